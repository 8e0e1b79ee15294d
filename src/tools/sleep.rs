//! Timed test tool that exercises progress reporting

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Emitter, Tool, ToolContext, ToolFailure, ToolResult};
use crate::agent::callbacks::ProgressMessage;

/// Runs for a given duration, sending evenly spaced progress updates
pub struct SleepTool;

#[derive(Deserialize)]
struct SleepArgs {
    duration_seconds: f64,
    update_count: i64,
    success: bool,
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Example tool that runs for a specified duration and sends progress updates.\n\
         Succeeds or fails at the end depending on `success`."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "duration_seconds": {"type": "number", "description": "How long the tool should run"},
                "update_count": {"type": "integer", "description": "Number of progress updates to send"},
                "success": {"type": "boolean", "description": "Whether to succeed or fail after the duration"}
            },
            "required": ["duration_seconds", "update_count", "success"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: SleepArgs = parse_args(self.name(), args)?;
        if args.update_count < 0 {
            return Err(ToolFailure::reported(format!(
                "update_count must be >= 0, got {}",
                args.update_count
            )));
        }
        if args.duration_seconds.is_nan() || args.duration_seconds < 0.0 {
            return Err(ToolFailure::reported(format!(
                "duration_seconds must be >= 0, got {}",
                args.duration_seconds
            )));
        }

        let started = Instant::now();
        let total = Duration::from_secs_f64(args.duration_seconds);
        let count = args.update_count;
        let interval = if count > 0 { total / count as u32 } else { Duration::ZERO };

        for i in 0..count {
            let remaining = total.saturating_sub(started.elapsed());
            out.progress(
                ProgressMessage::new(format!("Progress update {}/{}", i + 1, count))
                    .with_ratio((i + 1) as f64 / count as f64)
                    .with_eta_minutes(remaining.as_secs_f64() / 60.0),
            );
            if i < count - 1 {
                tokio::time::sleep(interval).await;
            }
        }

        let elapsed = started.elapsed();
        if elapsed < total {
            tokio::time::sleep(total - elapsed).await;
        }

        if args.success {
            out.success(format!(
                "Successfully completed after {} seconds with {} updates",
                args.duration_seconds, count
            ));
        } else {
            out.error("Test tool failed as requested");
        }
        Ok(())
    }
}
