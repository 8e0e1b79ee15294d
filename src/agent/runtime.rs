//! Process-wide pieces shared by every conversation.

use std::sync::Arc;

use crate::templates;
use crate::tools::ToolRegistry;

use super::commands::CommandRouter;
use super::llm::ModelProvider;

/// Built once at startup and shared read-only by every [`Agent`](super::Agent).
pub struct Runtime {
    pub provider: Arc<dyn ModelProvider>,
    pub tools: ToolRegistry,
    pub commands: CommandRouter,
    /// System prompt template with `{{ ... }}` placeholders
    pub template: String,
}

impl Runtime {
    /// Runtime with the built-in commands and the bundled system prompt.
    pub fn new(provider: Arc<dyn ModelProvider>, tools: ToolRegistry) -> Self {
        Self {
            provider,
            tools,
            commands: CommandRouter::with_builtins(),
            template: templates::SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_commands(mut self, commands: CommandRouter) -> Self {
        self.commands = commands;
        self
    }
}
