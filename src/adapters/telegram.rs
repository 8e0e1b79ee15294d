//! Telegram adapter using teloxide
//!
//! Every Telegram user gets their own [`Agent`] and media manager. Tool
//! activity is shown as one status message per invocation that is edited as
//! progress arrives and replaced by the final result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{BotCommand, ChatAction, ChatId, Document, MessageId, User, UserId};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{display_text, format_progress, Channel};
use crate::agent::{
    Agent, DriverCallbacks, ErrorMessage, ProgressMessage, Runtime, StartMessage,
    SuccessMessage, UserIdentity,
};
use crate::config::Config;
use crate::error::Error;
use crate::media::{EntryRole, MediaManager, TranscriptEntry, TranscriptSink};
use crate::tools::sandbox;
use crate::Result;

/// Telegram rejects longer messages.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;
const COMMAND_DESCRIPTION_LIMIT: usize = 256;

/// Split `text` into chunks of at most `limit` characters, preferring line breaks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + limit).min(chars.len());
        if end < chars.len() {
            if let Some(newline) = chars[start..end].iter().rposition(|&c| c == '\n') {
                if newline > limit / 2 {
                    end = start + newline + 1;
                }
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}

/// An empty allow-list lets everyone in; otherwise username or numeric id must match.
pub fn is_allowed(allow_from: &[String], username: Option<&str>, user_id: u64) -> bool {
    if allow_from.is_empty() {
        return true;
    }
    let id = user_id.to_string();
    allow_from.iter().any(|allowed| {
        let allowed = allowed.trim_start_matches('@');
        allowed == id || username.is_some_and(|u| u.eq_ignore_ascii_case(allowed))
    })
}

fn identity(user: &User) -> UserIdentity {
    UserIdentity {
        name: user.full_name(),
        username: user.username.clone(),
        language: user.language_code.clone(),
    }
}

/// Callback sink bound to the chat a user last wrote from.
pub struct TelegramCallbacks {
    bot: Bot,
    chat_id: AtomicI64,
    status: StdMutex<HashMap<String, MessageId>>,
}

impl TelegramCallbacks {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self {
            bot,
            chat_id: AtomicI64::new(chat_id.0),
            status: StdMutex::new(HashMap::new()),
        }
    }

    fn chat(&self) -> ChatId {
        ChatId(self.chat_id.load(Ordering::SeqCst))
    }

    fn set_chat(&self, chat_id: ChatId) {
        self.chat_id.store(chat_id.0, Ordering::SeqCst);
    }

    fn status(&self) -> std::sync::MutexGuard<'_, HashMap<String, MessageId>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send(&self, text: &str) -> Option<MessageId> {
        let chunk = split_message(text, TELEGRAM_MESSAGE_LIMIT)
            .into_iter()
            .next()
            .unwrap_or_default();
        match self.bot.send_message(self.chat(), chunk).await {
            Ok(sent) => Some(sent.id),
            Err(e) => {
                warn!("Failed to send tool status: {}", e);
                None
            }
        }
    }

    async fn finish(&self, tool_id: &str, text: String) {
        let status = self.status().remove(tool_id);
        if let Some(id) = status {
            if let Err(e) = self.bot.delete_message(self.chat(), id).await {
                debug!("Failed to delete status message: {}", e);
            }
        }
        self.send(&text).await;
    }
}

#[async_trait]
impl DriverCallbacks for TelegramCallbacks {
    async fn on_tool_start(&self, message: &StartMessage, tool_id: &str) {
        let text = if message.details_visible {
            format!("🔧 Starting {} - args: {}", message.tool_name, message.arguments)
        } else {
            format!("🔧 Starting {}", message.tool_name)
        };
        if let Some(id) = self.send(&text).await {
            self.status().insert(tool_id.to_string(), id);
        }
    }

    async fn on_tool_progress(&self, message: &ProgressMessage, tool_id: &str) {
        let text = format!("🔄 {}", format_progress(message));
        let existing = self.status().get(tool_id).copied();
        match existing {
            Some(id) => {
                if let Err(e) = self.bot.edit_message_text(self.chat(), id, text).await {
                    debug!("Failed to edit status message: {}", e);
                }
            }
            None => {
                if let Some(id) = self.send(&text).await {
                    self.status().insert(tool_id.to_string(), id);
                }
            }
        }
    }

    async fn on_tool_success(&self, message: &SuccessMessage, tool_id: &str) {
        self.finish(tool_id, format!("✅ {}", message.text)).await;
    }

    async fn on_tool_error(&self, message: &ErrorMessage, tool_id: &str) {
        self.finish(tool_id, format!("❌ {}", message.text)).await;
    }
}

/// One user's conversation.
struct Session {
    agent: Mutex<Agent>,
    media: Arc<MediaManager>,
    callbacks: Arc<TelegramCallbacks>,
}

struct TelegramState {
    bot: Bot,
    runtime: Arc<Runtime>,
    config: Config,
    sessions: Mutex<HashMap<UserId, Arc<Session>>>,
}

impl TelegramState {
    async fn session(&self, user_id: UserId, chat_id: ChatId) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&user_id) {
            session.callbacks.set_chat(chat_id);
            return Ok(session.clone());
        }

        let media = Arc::new(MediaManager::create(self.config.media_dir.as_deref())?);
        let callbacks = Arc::new(TelegramCallbacks::new(self.bot.clone(), chat_id));
        let agent = Agent::new(self.runtime.clone(), media.clone(), &self.config)?
            .with_callbacks(callbacks.clone());
        info!("Started conversation for user {}", user_id);

        let session = Arc::new(Session {
            agent: Mutex::new(agent),
            media,
            callbacks,
        });
        sessions.insert(user_id, session.clone());
        Ok(session)
    }

    async fn handle_message(&self, msg: Message) -> Result<()> {
        let chat_id = msg.chat.id;
        let Some(user) = msg.from() else {
            return Ok(());
        };
        if !is_allowed(&self.config.telegram.allow_from, user.username.as_deref(), user.id.0) {
            debug!("Ignoring message from unauthorized user: {}", user.id);
            return Ok(());
        }

        let session = self.session(user.id, chat_id).await?;

        if let Some(document) = msg.document() {
            return self.save_document(&session, document, chat_id).await;
        }

        let Some(text) = msg.text() else {
            return Ok(());
        };
        debug!("Received message from {}: {}", chat_id, text);

        if let Err(e) = self.bot.send_chat_action(chat_id, ChatAction::Typing).await {
            debug!("Failed to send typing action: {}", e);
        }

        let response = session.agent.lock().await.handle_message(text, &identity(user)).await;
        for chunk in split_message(&display_text(&response), TELEGRAM_MESSAGE_LIMIT) {
            self.bot.send_message(chat_id, chunk).await?;
        }
        Ok(())
    }

    /// Store an uploaded document in the user's active session directory.
    async fn save_document(&self, session: &Session, document: &Document, chat_id: ChatId) -> Result<()> {
        let dir = session.media.current_subdir()?;
        let name = document
            .file_name
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("upload-{}", document.file.unique_id));

        let target: PathBuf = match sandbox::ensure_contained(&dir, &name) {
            Ok(target) => target,
            Err(e) => {
                self.bot.send_message(chat_id, format!("❌ Error saving file: {e}")).await?;
                return Ok(());
            }
        };

        let file = self.bot.get_file(&document.file.id).await?;
        let mut dst = tokio::fs::File::create(&target).await?;
        if let Err(e) = self.bot.download_file(&file.path, &mut dst).await {
            self.bot.send_message(chat_id, format!("❌ Error saving file: {e}")).await?;
            return Ok(());
        }

        let size_kb = document.file.size as f64 / 1024.0;
        info!("Saved upload {} ({:.1} KB)", name, size_kb);
        session.media.record(
            TranscriptEntry::new(EntryRole::User, format!("Uploaded file: {name}"))
                .with("file", name.clone()),
        );
        self.bot
            .send_message(chat_id, format!("📥 Saved {name} ({size_kb:.1} KB)"))
            .await?;
        Ok(())
    }

    /// Publish the command menu from the router.
    async fn register_commands(&self) -> Result<()> {
        let commands: Vec<BotCommand> = self
            .runtime
            .commands
            .descriptions()
            .into_iter()
            .map(|(name, description)| {
                let description = if description.chars().count() > COMMAND_DESCRIPTION_LIMIT {
                    let cut: String = description.chars().take(COMMAND_DESCRIPTION_LIMIT - 3).collect();
                    format!("{cut}...")
                } else {
                    description
                };
                BotCommand::new(name, description)
            })
            .collect();
        let count = commands.len();
        self.bot.set_my_commands(commands).await?;
        info!("Registered {} commands with Telegram", count);
        Ok(())
    }
}

/// Telegram channel adapter
pub struct TelegramChannel {
    state: Arc<TelegramState>,
}

impl TelegramChannel {
    pub fn new(config: Config, runtime: Arc<Runtime>) -> Result<Self> {
        if config.telegram.token.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN not found in environment or config".to_string(),
            ));
        }
        let bot = Bot::new(&config.telegram.token);
        Ok(Self {
            state: Arc::new(TelegramState {
                bot,
                runtime,
                config,
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }
}

async fn run_telegram_loop(state: Arc<TelegramState>) {
    let handler = Update::filter_message().endpoint(
        |msg: Message, state: Arc<TelegramState>| async move {
            if let Err(e) = state.handle_message(msg).await {
                error!("Error handling telegram message: {}", e);
            }
            respond(())
        },
    );

    Dispatcher::builder(state.bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn start(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        let state = self.state.clone();
        async move {
            if let Err(e) = state.register_commands().await {
                warn!("Failed to register commands with Telegram: {}", e);
            }
            info!("Starting Telegram bot with model: {}", state.config.model);
            run_telegram_loop(state).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_message_short() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
    }

    #[test]
    fn test_split_message_prefers_newlines() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        let chunks = split_message(&text, 10);
        assert_eq!(chunks, vec![format!("{}\n", "a".repeat(8)), "b".repeat(8)]);
    }

    #[test]
    fn test_split_message_hard_cut() {
        let text = "é".repeat(25);
        let chunks = split_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_is_allowed() {
        assert!(is_allowed(&[], None, 1));

        let allow = vec!["@alice".to_string(), "42".to_string()];
        assert!(is_allowed(&allow, Some("Alice"), 7));
        assert!(is_allowed(&allow, None, 42));
        assert!(!is_allowed(&allow, Some("bob"), 7));
        assert!(!is_allowed(&allow, None, 7));
    }
}
