//! Adapters module - chat front-ends.
//!
//! Each front-end owns its conversations, forwards user text to an
//! [`Agent`](crate::agent::Agent) and shows tool activity through its own
//! [`DriverCallbacks`](crate::agent::DriverCallbacks) implementation.
//!
//! # Supported Channels
//!
//! - **CLI** - Interactive command line interface
//! - **Telegram** - Telegram Bot API via teloxide
//!
//! # Adding a New Channel
//!
//! 1. Create a new file (e.g., `slack.rs`)
//! 2. Implement the [`Channel`] trait and a callback sink
//! 3. Add a run mode in `main.rs`

pub mod cli;
pub mod telegram;

use crate::agent::{AgentResponse, ProgressMessage};

/// Channel trait for chat front-ends.
pub trait Channel: Send + Sync {
    /// Channel name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Serve until the user quits or the process is interrupted.
    fn start(&self) -> impl std::future::Future<Output = crate::Result<()>> + Send;
}

/// What the user sees for a response: the text, or the bare error when there is none.
pub fn display_text(response: &AgentResponse) -> String {
    match (&response.error, response.text.is_empty()) {
        (Some(error), true) => format!("Error: {error}"),
        _ => response.text.clone(),
    }
}

/// `text (42%) - ETA: 1.5m`, omitting the parts that are unknown.
pub fn format_progress(progress: &ProgressMessage) -> String {
    let mut line = progress.text.clone();
    if let Some(ratio) = progress.completion_ratio {
        line.push_str(&format!(" ({:.0}%)", ratio * 100.0));
    }
    if let Some(eta) = progress.eta_minutes {
        line.push_str(&format!(" - ETA: {eta:.1}m"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_text() {
        assert_eq!(display_text(&AgentResponse::text("hi")), "hi");
        assert_eq!(display_text(&AgentResponse::error("", "boom")), "Error: boom");
        assert_eq!(
            display_text(&AgentResponse::error("Error: bad arg", "bad arg")),
            "Error: bad arg"
        );
    }

    #[test]
    fn test_format_progress() {
        let plain = ProgressMessage::new("Downloading");
        assert_eq!(format_progress(&plain), "Downloading");

        let full = ProgressMessage::new("Downloading").with_ratio(0.42).with_eta_minutes(1.5);
        assert_eq!(format_progress(&full), "Downloading (42%) - ETA: 1.5m");
    }
}
