//! yt-dlp wrapper

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use clap::Args;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::tools::jsonl::Event;
use crate::Result;

pub const FORMATS: &[&str] = &["best", "720p", "480p", "360p", "bestaudio"];
pub const EXTRACT_KINDS: &[&str] = &["video", "audio", "subtitles"];

/// Options of `mgtools yt-dlp`.
#[derive(Args, Debug, Clone)]
pub struct DownloadOptions {
    /// Video URL to download
    pub url: String,

    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long, default_value = "best", value_parser = clap::builder::PossibleValuesParser::new(FORMATS))]
    pub format: String,

    #[arg(long, num_args = 1.., default_values_t = vec!["video".to_string()],
          value_parser = clap::builder::PossibleValuesParser::new(EXTRACT_KINDS))]
    pub extract: Vec<String>,

    /// Subtitle language codes (e.g. en he)
    #[arg(long, num_args = 1..)]
    pub subtitle_langs: Vec<String>,

    /// Netscape cookie file
    #[arg(long)]
    pub cookies: Option<PathBuf>,
}

/// yt-dlp format selector for a quality choice.
pub fn format_selector(choice: &str) -> &'static str {
    match choice {
        "720p" => "bestvideo[height<=720]+bestaudio/best[height<=720]",
        "480p" => "bestvideo[height<=480]+bestaudio/best[height<=480]",
        "360p" => "bestvideo[height<=360]+bestaudio/best[height<=360]",
        "bestaudio" => "bestaudio/best",
        _ => "bestvideo+bestaudio/best",
    }
}

/// Build the yt-dlp argument list, along with info lines describing it.
fn build_args(options: &DownloadOptions) -> (Vec<String>, Vec<String>) {
    let mut args = vec![
        "--newline".to_string(),
        "--progress".to_string(),
        "--no-warnings".to_string(),
        "--print".to_string(),
        "after_move:title".to_string(),
        "-o".to_string(),
        options
            .output_dir
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned(),
    ];
    let mut notes = Vec::new();

    if let Some(cookies) = options.cookies.as_ref().filter(|p| p.exists()) {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().into_owned());
        notes.push(format!("Using cookies from: {}", cookies.display()));
    }

    let wants = |kind: &str| options.extract.iter().any(|e| e == kind);
    if wants("video") {
        args.push("-f".to_string());
        args.push(format_selector(&options.format).to_string());
        notes.push(format!("Video format: {}", options.format));
    } else if wants("audio") {
        args.extend(
            ["-f", "bestaudio/best", "-x", "--audio-format", "m4a"]
                .iter()
                .map(|s| s.to_string()),
        );
        notes.push("Extracting audio only".to_string());
    } else {
        args.push("--skip-download".to_string());
    }

    if wants("subtitles") && !options.subtitle_langs.is_empty() {
        args.push("--write-subs".to_string());
        args.push("--sub-langs".to_string());
        args.push(options.subtitle_langs.join(","));
        notes.push(format!("Downloading subtitles: {}", options.subtitle_langs.join(", ")));
    }

    args.push(options.url.clone());
    (args, notes)
}

/// Percent and ETA (seconds) from a `[download]` progress line.
pub fn parse_download_line(line: &str) -> Option<(f64, Option<f64>)> {
    let pattern = Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%(?:.*ETA\s+(\d+(?::\d+){1,2}))?").ok()?;
    let caps = pattern.captures(line.trim())?;
    let percent = caps.get(1)?.as_str().parse().ok()?;
    let eta = caps.get(2).and_then(|m| {
        m.as_str()
            .split(':')
            .try_fold(0.0, |acc, part| part.parse::<f64>().ok().map(|v| acc * 60.0 + v))
    });
    Some((percent, eta))
}

pub(super) async fn run(options: &DownloadOptions) -> Result<i32> {
    let output_dir = if options.output_dir.is_absolute() {
        options.output_dir.clone()
    } else {
        std::env::current_dir()?.join(&options.output_dir)
    };
    std::fs::create_dir_all(&output_dir)?;
    let options = DownloadOptions {
        output_dir: output_dir.clone(),
        ..options.clone()
    };

    Event::info(format!("Downloading from: {}", options.url)).emit();
    Event::info(format!("Output directory: {}", output_dir.display())).emit();

    let (args, notes) = build_args(&options);
    for note in notes {
        Event::info(note).emit();
    }

    let spawned = Command::new("yt-dlp")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Event::error(
                "yt-dlp not found - please install yt-dlp",
                Some("yt-dlp executable not found in PATH".to_string()),
            )
            .emit();
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
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

    let mut title: Option<String> = None;
    let mut last_percent: Option<f64> = None;
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((percent, eta)) = parse_download_line(line) {
                if last_percent != Some(percent) {
                    let mut message = format!("Downloading: {percent:.1}%");
                    if let Some(eta) = eta {
                        message.push_str(&format!(" (ETA: {eta}s)"));
                    }
                    Event::Progress {
                        message,
                        percent: Some(percent),
                        eta_seconds: eta,
                    }
                    .emit();
                    last_percent = Some(percent);
                }
            } else if line.starts_with('[') {
                Event::info(line).emit();
            } else {
                title = Some(line.to_string());
            }
        }
    }

    let status = child.wait().await?;
    let stderr_lines = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => Vec::new(),
    };

    if status.success() {
        let title = title.unwrap_or_else(|| "video".to_string());
        Event::success(format!("Successfully downloaded: {title}")).emit();
        Ok(0)
    } else {
        let details: Vec<&str> = stderr_lines
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(String::as_str)
            .collect();
        let summary = stderr_lines
            .iter()
            .rev()
            .find(|l| l.starts_with("ERROR"))
            .cloned()
            .unwrap_or_else(|| format!("yt-dlp exited with {status}"));
        Event::error(format!("Download failed: {summary}"), Some(details.join("\n"))).emit();
        Ok(status.code().unwrap_or(1))
    }
}
