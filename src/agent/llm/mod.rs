//! LLM client abstraction layer.
//!
//! This module provides:
//! - [`LlmClient`] trait for swappable model backends
//! - [`ModelProvider`] for connecting a client by model id, used by `/model`
//! - [`AnthropicClient`], the Messages API implementation
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `openai.rs`)
//! 2. Implement `LlmClient` and `ModelProvider`
//! 3. Construct the provider in `main.rs`

mod types;

pub mod anthropic;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDefinition;
use crate::Result;

pub use anthropic::{AnthropicClient, AnthropicProvider};

use super::message::{Message, ToolCallRequest};

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text content of the response.
    pub content: Option<String>,

    /// Tool calls requested by the LLM.
    pub tool_calls: Vec<ToolCallRequest>,

    /// Reason the response finished.
    pub finish_reason: String,

    /// Token usage statistics.
    pub usage: Usage,
}

impl LlmResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: vec![],
            finish_reason: "end_turn".to_string(),
            usage: Usage::default(),
        }
    }

    /// Response requesting tool calls, with optional accompanying text.
    pub fn with_tool_calls(content: Option<&str>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: content.map(str::to_string),
            tool_calls,
            finish_reason: "tool_use".to_string(),
            usage: Usage::default(),
        }
    }

    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// One chat submission: system prompt and history in, text plus tool calls out.
///
/// The system prompt travels as the `Role::System` message at the head of
/// `messages`; pending tool results are the trailing `Role::Tool` messages.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse>;

    /// Model id this client submits to.
    fn model(&self) -> &str;
}

/// Creates clients by model id.
pub trait ModelProvider: Send + Sync {
    fn connect(&self, model_id: &str) -> Result<Arc<dyn LlmClient>>;
}

#[cfg(test)]
pub use fake::{FakeLlmClient, FakeProvider};
