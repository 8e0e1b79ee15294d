//! Agent loop - one conversation's message processing
//!
//! A user message starts an autonomous run: the model is prompted, every tool
//! call it makes is executed through the adapter, and the results go back to
//! the model until it answers without calling tools or the turn budget is
//! spent.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::{resolve_model, Config};
use crate::error::Error;
use crate::media::{EntryRole, MediaManager, TranscriptEntry, TranscriptSink};
use crate::tools::{ToolContext, ToolRegistry};
use crate::Result;

use super::callbacks::DriverCallbacks;
use super::llm::LlmClient;
use super::message::{AgentResponse, Message, UserIdentity};
use super::prompt::render_system_prompt;
use super::runtime::Runtime;

/// Prefix of a reply cut short by the turn budget.
pub const OUT_OF_TURNS: &str = "⚠ Ran out of autonomous turns before completing the task.";

/// Reply when the model never produced any text.
pub const NO_RESPONSE: &str = "No response generated.";

/// One conversation: model handle, history, settings and media session.
pub struct Agent {
    runtime: Arc<Runtime>,
    media: Arc<MediaManager>,
    callbacks: Option<Arc<dyn DriverCallbacks>>,
    model_name: String,
    client: Arc<dyn LlmClient>,
    history: Vec<Message>,
    max_turns: usize,
    tool_output_limit: usize,
    tool_details: bool,
}

impl Agent {
    /// Create an agent with settings from `config`, connecting its model.
    pub fn new(runtime: Arc<Runtime>, media: Arc<MediaManager>, config: &Config) -> Result<Self> {
        let model_id = resolve_model(&config.model)
            .ok_or_else(|| Error::Config(format!("Unknown model: {}", config.model)))?;
        let client = runtime.provider.connect(model_id)?;

        Ok(Self {
            runtime,
            media,
            callbacks: None,
            model_name: config.model.clone(),
            client,
            history: Vec::new(),
            max_turns: config.max_turns,
            tool_output_limit: config.tool_output_limit,
            tool_details: config.tool_details,
        })
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn DriverCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Switch to another model alias. History is kept.
    pub fn set_model(&mut self, alias: &str) -> Result<()> {
        let model_id =
            resolve_model(alias).ok_or_else(|| Error::Config(format!("Unknown model: {alias}")))?;
        self.client = self.runtime.provider.connect(model_id)?;
        self.model_name = alias.to_string();
        info!("Switched model to {} ({})", alias, model_id);
        Ok(())
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// 0 means unbounded.
    pub fn set_max_turns(&mut self, turns: usize) {
        self.max_turns = turns;
    }

    pub fn tool_output_limit(&self) -> usize {
        self.tool_output_limit
    }

    pub fn set_tool_output_limit(&mut self, limit: usize) {
        self.tool_output_limit = limit;
    }

    pub fn tool_details(&self) -> bool {
        self.tool_details
    }

    pub fn set_tool_details(&mut self, show: bool) {
        self.tool_details = show;
    }

    pub fn media(&self) -> &Arc<MediaManager> {
        &self.media
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.runtime.tools
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Forget the history and move to a fresh session directory.
    pub fn clear(&mut self) -> Result<()> {
        self.history.clear();
        self.media.reset_subdir()?;
        Ok(())
    }

    /// Run a slash command.
    pub fn handle_command(&mut self, input: &str) -> AgentResponse {
        let runtime = self.runtime.clone();
        runtime.commands.dispatch(self, input)
    }

    /// Handle one inbound message: a slash command or a prompt for the model.
    /// Failures come back in [`AgentResponse::error`], never as `Err`.
    pub async fn handle_message(&mut self, text: &str, user: &UserIdentity) -> AgentResponse {
        let text = text.trim();
        self.media.record(
            TranscriptEntry::new(EntryRole::User, text)
                .with("name", user.name.clone())
                .with("username", user.username.clone()),
        );

        if text.starts_with('/') {
            return self.handle_command(text);
        }

        match self.run(text, user).await {
            Ok(reply) => {
                self.media.record(
                    TranscriptEntry::new(EntryRole::Assistant, reply.clone())
                        .with("model", self.model_name.clone()),
                );
                AgentResponse::text(reply)
            }
            Err(e) => {
                error!("Agent loop failed: {}", e);
                self.media.record(TranscriptEntry::new(EntryRole::Error, e.to_string()));
                AgentResponse::error(String::new(), e.to_string())
            }
        }
    }

    fn tool_context(&self) -> Result<ToolContext> {
        let cwd = self.media.current_subdir()?;
        let transcript: Arc<dyn TranscriptSink> = self.media.clone();
        let mut ctx = ToolContext::new(cwd)
            .with_output_limit(self.tool_output_limit)
            .with_details(self.tool_details)
            .with_transcript(transcript);
        if let Some(callbacks) = &self.callbacks {
            ctx = ctx.with_callbacks(callbacks.clone());
        }
        Ok(ctx)
    }

    async fn run(&mut self, text: &str, user: &UserIdentity) -> Result<String> {
        if !text.is_empty() {
            self.history.push(Message::user(text));
        }

        let definitions = self.runtime.tools.definitions();
        let mut remaining = (self.max_turns > 0).then_some(self.max_turns);
        let mut last_text: Option<String> = None;

        info!(model = %self.model_name, max_turns = self.max_turns, "Starting agent loop");

        while remaining != Some(0) {
            let system = render_system_prompt(&self.runtime.template, user, self.max_turns, remaining);
            let mut messages = Vec::with_capacity(self.history.len() + 1);
            messages.push(Message::system(system));
            messages.extend(self.history.iter().cloned());

            let response = self.client.chat(&messages, &definitions).await?;
            let content = response.content.clone().unwrap_or_default();
            if !content.trim().is_empty() {
                last_text = Some(content.clone());
            }

            if !response.has_tool_calls() {
                self.history.push(Message::assistant(content));
                let reply = last_text.unwrap_or_else(|| NO_RESPONSE.to_string());
                info!("Agent completed with response: {} chars", reply.len());
                return Ok(reply);
            }

            let ctx = self.tool_context()?;
            self.history
                .push(Message::assistant_with_tools(content, response.tool_calls.clone()));

            for call in &response.tool_calls {
                debug!(tool = %call.name, id = %call.id, "Executing tool call");
                let result = ctx
                    .clone()
                    .scope(self.runtime.tools.invoke(&call.name, call.arguments.clone(), &ctx))
                    .await;
                self.history.push(Message::tool_result(&call.id, result));
            }

            if let Some(left) = remaining.as_mut() {
                *left -= 1;
                debug!(remaining = *left, "Turn finished");
            }
        }

        // Only reachable after a turn that ran tools.
        info!("Turn budget of {} exhausted", self.max_turns);
        let partial = last_text.unwrap_or_else(|| NO_RESPONSE.to_string());
        Ok(format!("{OUT_OF_TURNS}\n\n{partial}"))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model_name)
            .field("history", &self.history.len())
            .field("max_turns", &self.max_turns)
            .finish()
    }
}
