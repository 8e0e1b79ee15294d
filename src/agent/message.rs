//! Message types for agent communication

use serde::{Deserialize, Serialize};

/// Message role in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Tool call ID (for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls made by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    /// Assistant turn that requested tool calls
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Result string of one tool call, sent back on the next submission
    pub fn tool_result(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: result.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: None,
        }
    }
}

/// A tool call request from the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Who the agent is talking to, rendered into the system prompt.
#[derive(Debug, Clone, Default)]
pub struct UserIdentity {
    pub name: String,
    pub username: Option<String>,
    pub language: Option<String>,
}

impl UserIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Reply to one inbound message or command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentResponse {
    pub text: String,
    pub error: Option<String>,
    /// Shorter text for the transcript when `text` is large
    pub log_summary: Option<String>,
}

impl AgentResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// An error reply. The user sees `text`, `error` carries the bare reason.
    pub fn error(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: Some(error.into()),
            log_summary: None,
        }
    }

    pub fn with_log_summary(mut self, summary: impl Into<String>) -> Self {
        self.log_summary = Some(summary.into());
        self
    }
}
