//! Tool registry - the set of tools offered to the model

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::media::{EntryRole, TranscriptEntry};

use super::adapter;
use super::{
    FfmpegTool, GrepTool, HttpFetchTool, ListDirTool, RenameTool, RespondTool, SleepTool, Tool,
    ToolContext, TranscribeTool, YoutubeDownloadTool,
};

/// Tool definition for LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Name-unique collection of tools, built once at startup and then shared read-only.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    pub fn with_builtins(config: &Config) -> Self {
        let mut registry = Self::new();

        registry.register(ListDirTool);
        registry.register(GrepTool);
        registry.register(RenameTool);
        registry.register(HttpFetchTool::new());
        registry.register(FfmpegTool);
        registry.register(YoutubeDownloadTool);
        registry.register(TranscribeTool::new(&config.assemblyai_api_key));
        registry.register(SleepTool);
        registry.register(RespondTool);

        registry
    }

    /// Register a tool. Returns `false` and changes nothing if the name is taken.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> bool {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            debug!("Tool {} already registered, keeping the first", name);
            return false;
        }
        self.tools.insert(name, tool);
        true
    }

    /// Get tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool by name through the adapter. Unknown names yield an error string.
    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> String {
        match self.tools.get(name) {
            Some(tool) => adapter::invoke(tool.as_ref(), args, ctx).await,
            None => {
                warn!("Model requested unknown tool: {}", name);
                let text = format!("Error: Unknown tool: {name}");
                ctx.record(TranscriptEntry::new(EntryRole::Error, text.clone()).with("tool", name));
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{ScriptedTool, Step};

    #[tokio::test]
    async fn test_register_and_invoke() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(ScriptedTool::new("echo", vec![Step::Success("hi")])));
        assert!(registry.has("echo"));

        let ctx = ToolContext::new(std::env::temp_dir());
        let result = registry.invoke("echo", serde_json::json!({}), &ctx).await;
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let mut registry = ToolRegistry::new();
        registry.register(ScriptedTool::new("echo", vec![Step::Success("first")]));
        assert!(!registry.register(ScriptedTool::new("echo", vec![Step::Success("second")])));
        assert_eq!(registry.len(), 1);

        let ctx = ToolContext::new(std::env::temp_dir());
        assert_eq!(registry.invoke("echo", serde_json::json!({}), &ctx).await, "first");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new(std::env::temp_dir());
        let result = registry.invoke("nope", serde_json::json!({}), &ctx).await;
        assert_eq!(result, "Error: Unknown tool: nope");
    }

    #[test]
    fn test_builtins_are_sorted_and_complete() {
        let registry = ToolRegistry::with_builtins(&Config::default());
        assert_eq!(
            registry.tool_names(),
            vec![
                "ffmpeg",
                "grep",
                "http_fetch",
                "listdir",
                "rename",
                "respond",
                "sleep",
                "transcribe",
                "youtube_download",
            ]
        );
        assert_eq!(registry.definitions().len(), registry.len());
    }
}
