//! JSON-lines protocol spoken by media helper subprocesses.
//!
//! A helper prints one event per line on stdout:
//!
//! ```text
//! {"type": "progress", "message": "...", "percent": 50, "eta_seconds": 30}
//! {"type": "success", "message": "..."}
//! {"type": "error", "message": "...", "error_details": "..."}
//! {"type": "info", "message": "..."}
//! ```
//!
//! [`run_jsonl`] relays those events as tool messages. Lines that are not
//! JSON are kept as plain output and used to describe the result when the
//! helper exits without a `success` or `error` event.

use std::io::ErrorKind;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{Emitter, ToolResult};
use crate::agent::callbacks::ProgressMessage;

/// Lines kept from the output tail on success.
const SUCCESS_TAIL: usize = 5;
/// Lines kept from the output tail on failure.
const FAILURE_TAIL: usize = 10;

/// One protocol line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta_seconds: Option<f64>,
    },
    Success {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_details: Option<String>,
    },
    Info {
        #[serde(default)]
        message: String,
    },
}

impl Event {
    pub fn info(message: impl Into<String>) -> Self {
        Event::Info {
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Event::Success {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Event::Error {
            message: message.into(),
            error_details: details.filter(|d| !d.is_empty()),
        }
    }

    /// Print the event as one line on stdout.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
    }
}

/// Run `command` and relay its JSONL events through `out`.
///
/// Stops at the first `error` event. After a `success` event the remaining
/// output is drained but nothing else is reported.
pub async fn run_jsonl(mut command: Command, tool_name: &str, out: &Emitter) -> ToolResult {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = command.as_std().get_program().to_string_lossy().into_owned();
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            out.error(format!("Error: {program} not found - is it installed?"));
            return Ok(());
        }
        Err(e) => {
            out.error(format!("Error running {tool_name}: {e}"));
            return Ok(());
        }
    };

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    collected.push(line.trim().to_string());
                }
            }
            collected
        })
    });

    let mut output_lines: Vec<String> = Vec::new();
    let mut succeeded = false;
    let mut failed = false;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(line) {
                Ok(Event::Progress {
                    message,
                    percent,
                    eta_seconds,
                }) => {
                    if succeeded || failed {
                        continue;
                    }
                    let mut progress = ProgressMessage::new(message);
                    if let Some(percent) = percent {
                        progress = progress.with_ratio(percent / 100.0);
                    }
                    if let Some(eta) = eta_seconds {
                        progress = progress.with_eta_minutes(eta / 60.0);
                    }
                    out.progress(progress);
                }
                Ok(Event::Success { message }) => {
                    if !succeeded && !failed {
                        succeeded = true;
                        out.success(message);
                    }
                }
                Ok(Event::Error {
                    message,
                    error_details,
                }) => {
                    if succeeded || failed {
                        continue;
                    }
                    let text = match error_details {
                        Some(details) if !details.is_empty() => format!("{message}\n{details}"),
                        _ => message,
                    };
                    failed = true;
                    out.error(text);
                }
                Ok(Event::Info { message }) => output_lines.push(message),
                Err(_) => output_lines.push(line.to_string()),
            }
        }
    }

    let status = child.wait().await?;
    if let Some(task) = stderr_task {
        if let Ok(lines) = task.await {
            output_lines.extend(lines);
        }
    }
    debug!("{} exited with {}", tool_name, status);

    if succeeded || failed {
        return Ok(());
    }

    if status.success() {
        let summary = if output_lines.is_empty() {
            format!("{tool_name} completed successfully")
        } else {
            tail(&output_lines, SUCCESS_TAIL)
        };
        out.success(summary);
    } else {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let details = if output_lines.is_empty() {
            format!("{tool_name} failed")
        } else {
            tail(&output_lines, FAILURE_TAIL)
        };
        out.error(format!("{tool_name} failed with exit code {code}\n{details}"));
    }
    Ok(())
}

fn tail(lines: &[String], n: usize) -> String {
    lines[lines.len().saturating_sub(n)..].join("\n")
}
