//! Tool message protocol and the driver callback sink.
//!
//! A tool reports what it is doing through four message kinds. `Progress` may
//! be sent any number of times; `Success` and `Error` are terminal and at most
//! one of them is reported per invocation. `Start` is produced by the adapter,
//! never by a tool body.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Intermediate status update from a running tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressMessage {
    pub text: String,
    /// Fraction of work done, within `0.0..=1.0`.
    pub completion_ratio: Option<f64>,
    pub eta_minutes: Option<f64>,
}

impl ProgressMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completion_ratio: None,
            eta_minutes: None,
        }
    }

    /// Set the completion ratio, clamped into `0.0..=1.0`.
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        if ratio.is_finite() {
            self.completion_ratio = Some(ratio.clamp(0.0, 1.0));
        }
        self
    }

    pub fn with_eta_minutes(mut self, minutes: f64) -> Self {
        if minutes.is_finite() && minutes >= 0.0 {
            self.eta_minutes = Some(minutes);
        }
        self
    }
}

/// Terminal success; `text` is what the model sees.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessMessage {
    pub text: String,
}

impl SuccessMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Terminal failure.
///
/// `unexpected` marks failures the tool did not report itself: faults,
/// protocol violations and missing results.
#[derive(Debug, Clone)]
pub struct ErrorMessage {
    pub text: String,
    pub cause: Option<Arc<anyhow::Error>>,
    pub unexpected: bool,
}

impl ErrorMessage {
    /// An error the tool reports deliberately.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cause: None,
            unexpected: false,
        }
    }

    /// An error synthesized on behalf of a misbehaving or failing tool.
    pub fn unexpected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cause: None,
            unexpected: true,
        }
    }

    pub fn with_cause(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }
}

impl PartialEq for ErrorMessage {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text && self.unexpected == other.unexpected
    }
}

/// Announces an invocation before the tool body runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StartMessage {
    pub tool_name: String,
    pub arguments: Value,
    /// Whether the front-end should show `arguments` to the user.
    pub details_visible: bool,
}

/// Everything a tool body can emit.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolMessage {
    Start(StartMessage),
    Progress(ProgressMessage),
    Success(SuccessMessage),
    Error(ErrorMessage),
}

impl ToolMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolMessage::Success(_) | ToolMessage::Error(_))
    }
}

impl From<ProgressMessage> for ToolMessage {
    fn from(msg: ProgressMessage) -> Self {
        ToolMessage::Progress(msg)
    }
}

impl From<SuccessMessage> for ToolMessage {
    fn from(msg: SuccessMessage) -> Self {
        ToolMessage::Success(msg)
    }
}

impl From<ErrorMessage> for ToolMessage {
    fn from(msg: ErrorMessage) -> Self {
        ToolMessage::Error(msg)
    }
}

/// Sink a front-end implements to show tool activity.
///
/// `tool_id` is unique per invocation and is the same across all calls for
/// one invocation. Implementations report their own delivery failures.
#[async_trait]
pub trait DriverCallbacks: Send + Sync {
    async fn on_tool_start(&self, message: &StartMessage, tool_id: &str);

    async fn on_tool_progress(&self, message: &ProgressMessage, tool_id: &str);

    async fn on_tool_success(&self, message: &SuccessMessage, tool_id: &str);

    async fn on_tool_error(&self, message: &ErrorMessage, tool_id: &str);
}

/// Callback event captured by [`RecordingCallbacks`].
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Start { tool_id: String, tool_name: String },
    Progress { tool_id: String, text: String },
    Success { tool_id: String, text: String },
    Error { tool_id: String, text: String, unexpected: bool },
}

#[cfg(test)]
impl Recorded {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Recorded::Success { .. } | Recorded::Error { .. })
    }

    pub fn tool_id(&self) -> &str {
        match self {
            Recorded::Start { tool_id, .. }
            | Recorded::Progress { tool_id, .. }
            | Recorded::Success { tool_id, .. }
            | Recorded::Error { tool_id, .. } => tool_id,
        }
    }
}

/// Callback sink that remembers every call, for tests.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingCallbacks {
    events: std::sync::Mutex<Vec<Recorded>>,
}

#[cfg(test)]
impl RecordingCallbacks {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn terminal_count(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
#[async_trait]
impl DriverCallbacks for RecordingCallbacks {
    async fn on_tool_start(&self, message: &StartMessage, tool_id: &str) {
        self.push(Recorded::Start {
            tool_id: tool_id.to_string(),
            tool_name: message.tool_name.clone(),
        });
    }

    async fn on_tool_progress(&self, message: &ProgressMessage, tool_id: &str) {
        self.push(Recorded::Progress {
            tool_id: tool_id.to_string(),
            text: message.text.clone(),
        });
    }

    async fn on_tool_success(&self, message: &SuccessMessage, tool_id: &str) {
        self.push(Recorded::Success {
            tool_id: tool_id.to_string(),
            text: message.text.clone(),
        });
    }

    async fn on_tool_error(&self, message: &ErrorMessage, tool_id: &str) {
        self.push(Recorded::Error {
            tool_id: tool_id.to_string(),
            text: message.text.clone(),
            unexpected: message.unexpected,
        });
    }
}
