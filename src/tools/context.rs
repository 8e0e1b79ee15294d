//! Per-invocation execution context.
//!
//! Every tool call runs with its own [`ToolContext`]: the session directory
//! it may touch, the output limit, where progress goes and where the
//! transcript is written. The context is passed to the tool explicitly and
//! is also bound task-locally, so helpers deep inside a tool can reach it
//! without threading it through. Bindings never leak between tasks.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::callbacks::DriverCallbacks;
use crate::config::DEFAULT_TOOL_OUTPUT_LIMIT;
use crate::media::{TranscriptEntry, TranscriptSink};
use crate::Result;

use super::sandbox;

tokio::task_local! {
    static CURRENT: ToolContext;
}

/// Ambient state for one tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    /// Session directory; every path a tool touches must resolve inside it.
    pub cwd: PathBuf,
    /// Maximum characters of a success result handed back to the model.
    pub output_limit: usize,
    /// Whether front-ends should display invocation arguments.
    pub show_details: bool,
    pub callbacks: Option<Arc<dyn DriverCallbacks>>,
    pub transcript: Option<Arc<dyn TranscriptSink>>,
}

impl ToolContext {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            output_limit: DEFAULT_TOOL_OUTPUT_LIMIT,
            show_details: false,
            callbacks: None,
            transcript: None,
        }
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    pub fn with_details(mut self, show: bool) -> Self {
        self.show_details = show;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn DriverCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptSink>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    /// Run `fut` with this context bound for the current task.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT.scope(self, fut).await
    }

    /// The context bound by the innermost enclosing [`ToolContext::scope`].
    pub fn current() -> Option<ToolContext> {
        CURRENT.try_with(|ctx| ctx.clone()).ok()
    }

    /// Resolve `path` against the session directory, rejecting escapes.
    pub fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        sandbox::ensure_contained(&self.cwd, path)
    }

    pub fn record(&self, entry: TranscriptEntry) {
        if let Some(transcript) = &self.transcript {
            transcript.record(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_current_outside_scope_is_none() {
        assert!(ToolContext::current().is_none());
    }

    #[tokio::test]
    async fn test_scope_binds_context() {
        let ctx = ToolContext::new("/tmp/session-a").with_output_limit(500);
        let seen = ctx
            .scope(async { ToolContext::current().map(|c| (c.cwd, c.output_limit)) })
            .await;
        assert_eq!(seen, Some((PathBuf::from("/tmp/session-a"), 500)));
        assert!(ToolContext::current().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let task = |dir: &'static str, limit: usize| {
            tokio::spawn(ToolContext::new(dir).with_output_limit(limit).scope(async move {
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                    let ctx = ToolContext::current().unwrap();
                    assert_eq!(ctx.cwd, PathBuf::from(dir));
                    assert_eq!(ctx.output_limit, limit);
                }
                true
            }))
        };

        let a = task("/tmp/a", 200);
        let b = task("/tmp/b", 300);
        assert!(a.await.unwrap());
        assert!(b.await.unwrap());
    }
}
