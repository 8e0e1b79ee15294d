//! Agent module - core conversation logic.
//!
//! This module contains:
//! - The tool message protocol and the [`DriverCallbacks`] sink
//! - LLM client trait and the Anthropic implementation
//! - The turn-bounded [`Agent`] loop and the slash-command router
//! - System prompt rendering
//!
//! # Adding a New LLM Provider
//!
//! See [`llm`] for instructions.

pub mod callbacks;
mod commands;
mod loop_impl;
mod message;
mod prompt;
mod runtime;

// LLM providers in submodule
pub mod llm;

pub use callbacks::{
    DriverCallbacks, ErrorMessage, ProgressMessage, StartMessage, SuccessMessage, ToolMessage,
};
pub use commands::{CommandHandler, CommandRouter};
pub use llm::{AnthropicClient, AnthropicProvider, LlmClient, LlmResponse, ModelProvider, Usage};
#[cfg(test)]
pub use llm::{FakeLlmClient, FakeProvider};
pub use loop_impl::{Agent, NO_RESPONSE, OUT_OF_TURNS};
pub use message::{AgentResponse, Message, Role, ToolCallRequest, UserIdentity};
pub use prompt::{render_system_prompt, user_info_text};
pub use runtime::Runtime;
