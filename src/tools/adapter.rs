//! Turns a message-emitting tool body into one awaited string result.
//!
//! For every invocation the adapter announces a start, relays progress as it
//! arrives, and reports exactly one terminal message to the callback sink.
//! Nothing escapes: faults, protocol violations and missing results all come
//! back as an error string for the model.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::callbacks::{ErrorMessage, StartMessage, SuccessMessage, ToolMessage};
use crate::media::{EntryRole, TranscriptEntry};

use super::{Emitter, Tool, ToolContext, ToolFailure};

/// Final outcome of an invocation, before it is reported.
enum Terminal {
    Success(SuccessMessage),
    Error(ErrorMessage),
}

impl Terminal {
    fn text(&self) -> &str {
        match self {
            Terminal::Success(msg) => &msg.text,
            Terminal::Error(msg) => &msg.text,
        }
    }
}

/// Run `tool` once with `args` under `ctx`.
pub async fn invoke(tool: &dyn Tool, args: Value, ctx: &ToolContext) -> String {
    let name = tool.name().to_string();
    let tool_id = format!("tool_{}_{}", name, Uuid::new_v4().simple());
    debug!(tool = %name, %tool_id, "Invoking tool with args: {}", args);

    let start = StartMessage {
        tool_name: name.clone(),
        arguments: args.clone(),
        details_visible: ctx.show_details,
    };
    if let Some(callbacks) = &ctx.callbacks {
        callbacks.on_tool_start(&start, &tool_id).await;
    }
    ctx.record(
        TranscriptEntry::new(EntryRole::ToolStart, name.clone())
            .with("tool_id", tool_id.clone())
            .with("arguments", args.clone()),
    );

    let terminal = drive(tool, &name, &tool_id, args, ctx).await;
    finish(terminal, &name, &tool_id, ctx).await
}

async fn drive(
    tool: &dyn Tool,
    name: &str,
    tool_id: &str,
    args: Value,
    ctx: &ToolContext,
) -> Terminal {
    let (out, mut rx) = Emitter::channel();
    let mut terminal: Option<Terminal> = None;

    let outcome = {
        let body = AssertUnwindSafe(tool.run(args, ctx, &out)).catch_unwind();
        tokio::pin!(body);

        loop {
            tokio::select! {
                biased;
                Some(message) = rx.recv() => {
                    if let Err(violation) = accept(message, &mut terminal, name, tool_id, ctx).await {
                        // Dropping `body` here abandons the tool.
                        return violation;
                    }
                }
                result = &mut body => break result,
            }
        }
    };

    while let Ok(message) = rx.try_recv() {
        if let Err(violation) = accept(message, &mut terminal, name, tool_id, ctx).await {
            return violation;
        }
    }

    let outcome = outcome.unwrap_or_else(|payload| {
        Err(ToolFailure::Fault(anyhow::anyhow!(
            "Tool {name} panicked: {}",
            panic_message(payload.as_ref())
        )))
    });

    match outcome {
        Ok(()) => {}
        Err(ToolFailure::Reported(error)) => {
            if terminal.is_some() {
                return yielded_past_final(name);
            }
            terminal = Some(Terminal::Error(error));
        }
        Err(ToolFailure::Fault(fault)) => {
            warn!(tool = %name, %tool_id, "Tool failed: {:#}", fault);
            let error = ErrorMessage::unexpected(format!("Error: {fault}")).with_cause(fault);
            terminal = Some(Terminal::Error(error));
        }
    }

    terminal.unwrap_or_else(|| {
        Terminal::Error(ErrorMessage::unexpected(format!(
            "Error: Tool {name} did not yield a final result"
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "unknown panic"
    }
}

/// Handle one emitted message. Terminals are held back until the body is done.
async fn accept(
    message: ToolMessage,
    terminal: &mut Option<Terminal>,
    name: &str,
    tool_id: &str,
    ctx: &ToolContext,
) -> Result<(), Terminal> {
    if terminal.is_some() {
        return Err(yielded_past_final(name));
    }

    match message {
        ToolMessage::Progress(progress) => {
            if let Some(callbacks) = &ctx.callbacks {
                callbacks.on_tool_progress(&progress, tool_id).await;
            }
        }
        ToolMessage::Success(success) => {
            let text = truncate_output(&success.text, ctx.output_limit);
            *terminal = Some(Terminal::Success(SuccessMessage::new(text)));
        }
        ToolMessage::Error(error) => *terminal = Some(Terminal::Error(error)),
        ToolMessage::Start(_) => {
            return Err(Terminal::Error(ErrorMessage::unexpected(format!(
                "Error: Tool {name} emitted a start message"
            ))));
        }
    }
    Ok(())
}

fn yielded_past_final(name: &str) -> Terminal {
    Terminal::Error(ErrorMessage::unexpected(format!(
        "Error: Tool {name} yielded past the final message"
    )))
}

async fn finish(terminal: Terminal, name: &str, tool_id: &str, ctx: &ToolContext) -> String {
    match &terminal {
        Terminal::Success(msg) => {
            debug!(tool = %name, %tool_id, "Tool succeeded: {} chars", msg.text.len());
            if let Some(callbacks) = &ctx.callbacks {
                callbacks.on_tool_success(msg, tool_id).await;
            }
        }
        Terminal::Error(msg) => {
            debug!(tool = %name, %tool_id, unexpected = msg.unexpected, "Tool failed: {}", msg.text);
            if let Some(callbacks) = &ctx.callbacks {
                callbacks.on_tool_error(msg, tool_id).await;
            }
        }
    }

    let is_error = matches!(terminal, Terminal::Error(_));
    let unexpected = match &terminal {
        Terminal::Error(msg) => msg.unexpected,
        Terminal::Success(_) => false,
    };
    let text = terminal.text().to_string();
    ctx.record(
        TranscriptEntry::new(EntryRole::ToolResult, text.clone())
            .with("tool", name)
            .with("tool_id", tool_id)
            .with("is_error", is_error)
            .with("unexpected", unexpected),
    );
    text
}

/// Keep the head and tail of oversized output, noting what was cut.
pub fn truncate_output(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit {
        return text.to_string();
    }

    let half = limit / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!(
        "{head}\n\n[... output truncated: showing the first {half} and last {half} of {total} characters. \
         Call the tool again with more specific parameters to narrow the output ...]\n\n{tail}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::callbacks::{Recorded, RecordingCallbacks};
    use crate::media::MemoryTranscript;
    use crate::tools::testing::{ScriptedTool, Step};
    use std::sync::Arc;

    fn context() -> (ToolContext, Arc<RecordingCallbacks>, Arc<MemoryTranscript>) {
        let callbacks = Arc::new(RecordingCallbacks::default());
        let transcript = Arc::new(MemoryTranscript::default());
        let ctx = ToolContext::new(std::env::temp_dir())
            .with_output_limit(200)
            .with_callbacks(callbacks.clone())
            .with_transcript(transcript.clone());
        (ctx, callbacks, transcript)
    }

    async fn run(steps: Vec<Step>) -> (String, Vec<Recorded>, Arc<MemoryTranscript>) {
        let (ctx, callbacks, transcript) = context();
        let tool = ScriptedTool::new("demo", steps);
        let result = invoke(&tool, serde_json::json!({"path": "x"}), &ctx).await;
        (result, callbacks.events(), transcript)
    }

    fn terminal_count(events: &[Recorded]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_progress_then_success() {
        let (result, events, transcript) =
            run(vec![Step::Progress("half"), Step::Success("done")]).await;

        assert_eq!(result, "done");
        assert!(matches!(&events[0], Recorded::Start { tool_name, .. } if tool_name == "demo"));
        assert!(matches!(&events[1], Recorded::Progress { text, .. } if text == "half"));
        assert!(matches!(&events[2], Recorded::Success { text, .. } if text == "done"));
        assert_eq!(events.len(), 3);

        let id = events[0].tool_id();
        assert!(id.starts_with("tool_demo_"));
        assert!(events.iter().all(|e| e.tool_id() == id));

        assert_eq!(
            transcript.roles(),
            vec![EntryRole::ToolStart, EntryRole::ToolResult]
        );
    }

    #[tokio::test]
    async fn test_reported_error_is_returned_as_is() {
        let (result, events, _) = run(vec![Step::Error("Error: file not found")]).await;
        assert_eq!(result, "Error: file not found");
        assert!(matches!(
            events.last(),
            Some(Recorded::Error { unexpected: false, .. })
        ));
    }

    #[tokio::test]
    async fn test_failure_shaped_error_counts_as_emitted() {
        let (result, events, _) = run(vec![Step::FailReported("Error: bad input")]).await;
        assert_eq!(result, "Error: bad input");
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn test_fault_becomes_unexpected_error() {
        let (result, events, _) = run(vec![Step::Progress("start"), Step::FailFault("disk on fire")]).await;
        assert_eq!(result, "Error: disk on fire");
        assert!(matches!(
            events.last(),
            Some(Recorded::Error { unexpected: true, .. })
        ));
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_unexpected_error() {
        let (result, events, transcript) =
            run(vec![Step::Progress("start"), Step::Panic("index out of range")]).await;
        assert_eq!(result, "Error: Tool demo panicked: index out of range");
        assert!(matches!(
            events.last(),
            Some(Recorded::Error { unexpected: true, .. })
        ));
        assert_eq!(terminal_count(&events), 1);
        assert_eq!(
            transcript.roles(),
            vec![EntryRole::ToolStart, EntryRole::ToolResult]
        );
    }

    #[tokio::test]
    async fn test_missing_final_result() {
        let (result, events, _) = run(vec![Step::Progress("working")]).await;
        assert_eq!(result, "Error: Tool demo did not yield a final result");
        assert!(matches!(
            events.last(),
            Some(Recorded::Error { unexpected: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_message_after_final_is_a_violation() {
        let (result, events, _) = run(vec![Step::Success("ok"), Step::Progress("late")]).await;
        assert_eq!(result, "Error: Tool demo yielded past the final message");
        assert_eq!(terminal_count(&events), 1);
        assert!(!events.iter().any(|e| matches!(e, Recorded::Success { .. })));
    }

    #[tokio::test]
    async fn test_violation_abandons_long_running_body() {
        let started = std::time::Instant::now();
        let (result, events, _) = run(vec![
            Step::Success("ok"),
            Step::Error("second"),
            Step::Sleep(10_000),
        ])
        .await;
        assert!(result.contains("yielded past the final message"));
        assert_eq!(terminal_count(&events), 1);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_long_success_is_truncated() {
        let long: &'static str = Box::leak("a".repeat(150).into_boxed_str());
        let tail: &'static str = Box::leak(format!("{long}{}", "z".repeat(150)).into_boxed_str());
        let (result, _, _) = run(vec![Step::Success(tail)]).await;

        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.ends_with(&"z".repeat(100)));
        assert!(result.contains("more specific parameters"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let text = "é".repeat(300);
        let out = truncate_output(&text, 128);
        assert!(out.starts_with(&"é".repeat(64)));
        assert!(out.ends_with(&"é".repeat(64)));
        assert_eq!(truncate_output("short", 128), "short");
    }

    #[tokio::test]
    async fn test_without_callbacks_still_returns_text() {
        let tool = ScriptedTool::new("quiet", vec![Step::Success("fine")]);
        let ctx = ToolContext::new(std::env::temp_dir());
        assert_eq!(invoke(&tool, serde_json::json!({}), &ctx).await, "fine");
    }
}
