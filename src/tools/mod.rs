//! Tools module - agent capabilities
//!
//! A tool body reports through an [`Emitter`]: any number of progress
//! messages and then exactly one success or error. The [`adapter`] turns that
//! stream into the single string the model sees and forwards the messages to
//! the front-end.

pub mod adapter;
mod context;
mod registry;
pub mod sandbox;

mod filesystem;
mod http;
pub mod jsonl;
mod media;
mod respond;
mod sleep;
mod transcribe;

pub use context::ToolContext;
pub use filesystem::{GrepTool, ListDirTool, RenameTool};
pub use http::HttpFetchTool;
pub use media::{FfmpegTool, YoutubeDownloadTool};
pub use registry::{ToolDefinition, ToolRegistry};
pub use respond::RespondTool;
pub use sleep::SleepTool;
pub use transcribe::TranscribeTool;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::agent::callbacks::{ErrorMessage, ProgressMessage, SuccessMessage, ToolMessage};
use crate::error::Error;

/// How a tool body can fail instead of emitting an error message.
#[derive(Debug)]
pub enum ToolFailure {
    /// A deliberate, user-facing error; treated as if it had been emitted.
    Reported(ErrorMessage),
    /// Anything else. Surfaces as an unexpected error with the fault attached.
    Fault(anyhow::Error),
}

pub type ToolResult = std::result::Result<(), ToolFailure>;

impl ToolFailure {
    pub fn reported(text: impl Into<String>) -> Self {
        ToolFailure::Reported(ErrorMessage::new(text))
    }
}

impl From<ErrorMessage> for ToolFailure {
    fn from(msg: ErrorMessage) -> Self {
        ToolFailure::Reported(msg)
    }
}

impl From<anyhow::Error> for ToolFailure {
    fn from(err: anyhow::Error) -> Self {
        ToolFailure::Fault(err)
    }
}

impl From<std::io::Error> for ToolFailure {
    fn from(err: std::io::Error) -> Self {
        ToolFailure::Fault(err.into())
    }
}

impl From<Error> for ToolFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::Containment { .. } => ToolFailure::reported(format!("Error: {err}")),
            other => ToolFailure::Fault(other.into()),
        }
    }
}

/// Channel end a tool body emits its messages into.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::UnboundedSender<ToolMessage>,
}

impl Emitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ToolMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: impl Into<ToolMessage>) {
        // The adapter may already have given up on this invocation.
        let _ = self.tx.send(message.into());
    }

    pub fn progress(&self, message: ProgressMessage) {
        self.send(message);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.send(SuccessMessage::new(text));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.send(ErrorMessage::new(text));
    }
}

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does; the first line is the summary
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Run the tool, emitting progress and a final result through `out`.
    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// `name(arg: type, optional?: type)` as shown by `/tools`.
    fn signature(&self) -> String {
        let schema = self.parameters();
        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut params: Vec<String> = schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|props| {
                props
                    .iter()
                    .map(|(name, spec)| {
                        let ty = spec.get("type").and_then(|t| t.as_str()).unwrap_or("any");
                        let marker = if required.contains(&name.as_str()) { "" } else { "?" };
                        format!("{name}{marker}: {ty}")
                    })
                    .collect()
            })
            .unwrap_or_default();
        params.sort();

        format!("{}({})", self.name(), params.join(", "))
    }
}

/// Deserialize tool arguments, reporting bad input to the model as a plain error.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T, ToolFailure> {
    serde_json::from_value(args)
        .map_err(|e| ToolFailure::reported(format!("Error: invalid arguments for {tool}: {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted tools for adapter, registry and agent tests.

    use super::*;
    use std::time::Duration;

    /// What a [`ScriptedTool`] does when run.
    #[derive(Clone)]
    pub enum Step {
        Progress(&'static str),
        Success(&'static str),
        Error(&'static str),
        Sleep(u64),
        FailReported(&'static str),
        FailFault(&'static str),
        Panic(&'static str),
    }

    pub struct ScriptedTool {
        pub name: &'static str,
        pub steps: Vec<Step>,
    }

    impl ScriptedTool {
        pub fn new(name: &'static str, steps: Vec<Step>) -> Self {
            Self { name, steps }
        }
    }

    #[async_trait]
    impl Tool for ScriptedTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Scripted tool for tests.\nSecond line."
        }

        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "count": {"type": "integer"}
                },
                "required": ["path"]
            })
        }

        async fn run(&self, _args: Value, _ctx: &ToolContext, out: &Emitter) -> ToolResult {
            for step in &self.steps {
                match step {
                    Step::Progress(t) => out.progress(ProgressMessage::new(*t)),
                    Step::Success(t) => out.success(*t),
                    Step::Error(t) => out.error(*t),
                    Step::Sleep(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
                    Step::FailReported(t) => return Err(ToolFailure::reported(*t)),
                    Step::FailFault(t) => return Err(anyhow::anyhow!(*t).into()),
                    Step::Panic(t) => panic!("{}", t),
                }
            }
            Ok(())
        }
    }
}
