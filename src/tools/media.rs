//! Media tools - ffmpeg and video downloads through the JSONL helpers

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use super::http::COOKIES_FILE;
use super::jsonl::run_jsonl;
use super::{parse_args, Emitter, Tool, ToolContext, ToolFailure, ToolResult};
use crate::mgtools::yt_dlp_formats;

/// `mediagram mgtools <helper>`, running in the session directory.
fn helper_command(helper: &str, cwd: &Path) -> Result<Command, ToolFailure> {
    let exe = std::env::current_exe()?;
    let mut command = Command::new(exe);
    command.arg("mgtools").arg(helper).current_dir(cwd);
    Ok(command)
}

/// Reject arguments that name files outside the session directory.
///
/// Only plain path-looking arguments are checked: absolute paths and
/// anything with a `..` component.
fn check_paths(args: &[String], ctx: &ToolContext) -> Result<(), ToolFailure> {
    for arg in args.iter().filter(|a| !a.starts_with('-')) {
        let path = Path::new(arg);
        let suspicious = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if suspicious && !arg.contains("://") {
            ctx.resolve(path)?;
        }
    }
    Ok(())
}

/// Run ffmpeg with arbitrary arguments
pub struct FfmpegTool;

#[derive(Deserialize)]
struct FfmpegArgs {
    args: Vec<String>,
}

#[async_trait]
impl Tool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn description(&self) -> &str {
        "Run ffmpeg with arbitrary arguments for media processing: convert formats, \
         scale, extract audio, burn subtitles, trim, concatenate and more.\n\
         Pass only the arguments, not 'ffmpeg' itself. Examples:\n\
         - Scale to 720p: [\"-i\", \"input.mp4\", \"-vf\", \"scale=-2:720\", \"output.mp4\"]\n\
         - Extract audio: [\"-i\", \"input.mp4\", \"-vn\", \"-acodec\", \"copy\", \"output.m4a\"]\n\
         - Burn subtitles: [\"-i\", \"input.mp4\", \"-vf\", \"subtitles=subs.srt\", \"output.mp4\"]"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "args": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "ffmpeg arguments, relative to the media directory"
                }
            },
            "required": ["args"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: FfmpegArgs = parse_args(self.name(), args)?;
        if args.args.is_empty() {
            out.error("No ffmpeg arguments provided");
            return Ok(());
        }
        check_paths(&args.args, ctx)?;

        let mut command = helper_command("ffmpeg", &ctx.cwd)?;
        // Everything after `--` goes to ffmpeg untouched.
        command.arg("--").args(&args.args);
        run_jsonl(command, self.name(), out).await
    }
}

/// Download video, audio and subtitles with yt-dlp
pub struct YoutubeDownloadTool;

#[derive(Deserialize)]
struct DownloadArgs {
    url: String,
    #[serde(default = "default_format")]
    format: String,
    #[serde(default)]
    extract: Option<Vec<String>>,
    #[serde(default)]
    subtitle_langs: Vec<String>,
}

fn default_format() -> String {
    "best".to_string()
}

/// Session `cookies.txt` first, then `~/.mediagram.d/cookies.txt`.
fn cookie_file(cwd: &Path) -> Option<PathBuf> {
    let session = cwd.join(COOKIES_FILE);
    if session.exists() {
        return Some(session);
    }
    crate::config::config_dir()
        .join(COOKIES_FILE)
        .canonicalize()
        .ok()
}

#[async_trait]
impl Tool for YoutubeDownloadTool {
    fn name(&self) -> &str {
        "youtube_download"
    }

    fn description(&self) -> &str {
        "Download video, audio and/or subtitles from YouTube or other sites supported by yt-dlp."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL of the video"},
                "format": {
                    "type": "string",
                    "enum": yt_dlp_formats(),
                    "description": "Video quality (default: best)"
                },
                "extract": {
                    "type": "array",
                    "items": {"type": "string", "enum": ["video", "audio", "subtitles"]},
                    "description": "What to extract (default: [\"video\"])"
                },
                "subtitle_langs": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Subtitle language codes, e.g. [\"en\", \"he\"]"
                }
            },
            "required": ["url"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: DownloadArgs = parse_args(self.name(), args)?;
        if !yt_dlp_formats().contains(&args.format.as_str()) {
            out.error(format!(
                "Unknown format: {}. Expected one of: {}",
                args.format,
                yt_dlp_formats().join(", ")
            ));
            return Ok(());
        }
        let extract = args.extract.unwrap_or_else(|| vec!["video".to_string()]);
        if extract.is_empty() {
            out.error("extract must name at least one of: video, audio, subtitles");
            return Ok(());
        }
        if let Some(bad) = extract
            .iter()
            .find(|e| !matches!(e.as_str(), "video" | "audio" | "subtitles"))
        {
            out.error(format!("Unknown extract kind: {bad}"));
            return Ok(());
        }

        let mut command = helper_command("yt-dlp", &ctx.cwd)?;
        command
            .arg(&args.url)
            .arg("--output-dir")
            .arg(&ctx.cwd)
            .arg("--format")
            .arg(&args.format)
            .arg("--extract")
            .args(&extract);
        if !args.subtitle_langs.is_empty() {
            command.arg("--subtitle-langs").args(&args.subtitle_langs);
        }
        if let Some(cookies) = cookie_file(&ctx.cwd) {
            command.arg("--cookies").arg(cookies);
        }

        run_jsonl(command, self.name(), out).await
    }
}
