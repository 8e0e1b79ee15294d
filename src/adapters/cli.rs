//! CLI adapter - interactive and scripted command line sessions.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{display_text, format_progress, Channel};
use crate::agent::{
    Agent, DriverCallbacks, ErrorMessage, ProgressMessage, StartMessage, SuccessMessage,
    UserIdentity,
};
use crate::ui;
use crate::Result;

/// Shows each tool invocation as a progress bar in the terminal.
#[derive(Default)]
pub struct CliCallbacks {
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl CliCallbacks {
    fn take(&self, tool_id: &str) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_id)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[async_trait]
impl DriverCallbacks for CliCallbacks {
    async fn on_tool_start(&self, message: &StartMessage, tool_id: &str) {
        if message.details_visible {
            println!("  🔧 Starting {} - args: {}", message.tool_name.bold(), message.arguments);
        } else {
            println!("  🔧 Starting {}", message.tool_name.bold());
        }
        let bar = ProgressBar::new(100).with_style(bar_style());
        bar.enable_steady_tick(Duration::from_millis(120));
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_id.to_string(), bar);
    }

    async fn on_tool_progress(&self, message: &ProgressMessage, tool_id: &str) {
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.get(tool_id) {
            if let Some(ratio) = message.completion_ratio {
                bar.set_position((ratio * 100.0).round() as u64);
            }
            bar.set_message(format_progress(message));
        }
    }

    async fn on_tool_success(&self, message: &SuccessMessage, tool_id: &str) {
        if let Some(bar) = self.take(tool_id) {
            bar.finish_and_clear();
        }
        println!("  {} {}", "✅".green(), first_line(&message.text));
    }

    async fn on_tool_error(&self, message: &ErrorMessage, tool_id: &str) {
        if let Some(bar) = self.take(tool_id) {
            bar.finish_and_clear();
        }
        println!("  {} {}", "❌".red(), first_line(&message.text).red());
    }
}

/// Where user input comes from.
enum InputSource {
    Interactive,
    /// Messages given on the command line, sent in order, then the session ends.
    Predefined(Vec<String>),
}

/// CLI channel wrapping one agent.
pub struct CliChannel {
    agent: tokio::sync::Mutex<Agent>,
    user: UserIdentity,
    input: InputSource,
}

impl CliChannel {
    pub fn new(agent: Agent, user: UserIdentity) -> Self {
        Self {
            agent: tokio::sync::Mutex::new(agent),
            user,
            input: InputSource::Interactive,
        }
    }

    /// Send these messages instead of reading stdin. Empty keeps the REPL.
    pub fn with_messages(mut self, messages: Vec<String>) -> Self {
        if !messages.is_empty() {
            self.input = InputSource::Predefined(messages);
        }
        self
    }

    /// Identity of the local user, from the OS account.
    pub fn local_user() -> UserIdentity {
        let username = whoami::username();
        let name = whoami::realname();
        let name = if name.trim().is_empty() { username.clone() } else { name };
        UserIdentity::new(name).with_username(username)
    }

    async fn send(&self, input: &str) {
        if !input.starts_with('/') {
            ui::print_thinking("Thinking");
        }
        let response = self.agent.lock().await.handle_message(input, &self.user).await;
        if response.error.is_some() {
            println!("\n{}\n", display_text(&response).red());
        } else {
            println!("\n{}: {}\n", "Bot".green().bold(), response.text);
        }
    }
}

fn is_quit(input: &str) -> bool {
    matches!(input, "/quit" | "/exit")
}

impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn start(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async move {
            {
                let agent = self.agent.lock().await;
                ui::print_header(agent.model_name(), &agent.media().root().display().to_string());
            }

            if let InputSource::Predefined(messages) = &self.input {
                for message in messages {
                    println!("{}: {}", "You".blue().bold(), message);
                    if is_quit(message.trim()) {
                        break;
                    }
                    self.send(message).await;
                }
                return Ok(());
            }

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("{}: ", "You".blue().bold());
                std::io::stdout().flush()?;

                let Some(line) = lines.next_line().await? else {
                    println!();
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if is_quit(input) {
                    println!("👋 Bye!");
                    break;
                }
                self.send(input).await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::agent::{FakeLlmClient, FakeProvider, LlmResponse, Runtime};
    use crate::config::Config;
    use crate::media::MediaManager;
    use crate::tools::ToolRegistry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_predefined_messages_run_in_order() {
        let tmp = TempDir::new().unwrap();
        let client = Arc::new(FakeLlmClient::default());
        client.push(LlmResponse::text("first"));
        let runtime = Arc::new(Runtime::new(
            Arc::new(FakeProvider::new(client.clone())),
            ToolRegistry::new(),
        ));
        let media = Arc::new(MediaManager::with_root(tmp.path()));
        let agent = Agent::new(runtime, media, &Config::default()).unwrap();

        let channel = CliChannel::new(agent, UserIdentity::new("tester")).with_messages(vec![
            "hello".to_string(),
            "/turns 3".to_string(),
            "/quit".to_string(),
            "never sent".to_string(),
        ]);
        channel.start().await.unwrap();

        assert_eq!(client.call_count(), 1);
        assert_eq!(channel.agent.lock().await.max_turns(), 3);
    }

    #[tokio::test]
    async fn test_callbacks_track_bars() {
        let callbacks = CliCallbacks::default();
        let start = StartMessage {
            tool_name: "sleep".to_string(),
            arguments: serde_json::json!({}),
            details_visible: true,
        };
        callbacks.on_tool_start(&start, "t1").await;
        callbacks
            .on_tool_progress(&ProgressMessage::new("half").with_ratio(0.5), "t1")
            .await;
        assert_eq!(callbacks.bars.lock().unwrap()["t1"].position(), 50);

        callbacks.on_tool_success(&SuccessMessage::new("done"), "t1").await;
        assert!(callbacks.bars.lock().unwrap().is_empty());
    }
}
