//! ffmpeg wrapper

use std::io::ErrorKind;
use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::tools::jsonl::Event;
use crate::Result;

/// One parsed `time=` status line.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegProgress {
    pub current_seconds: f64,
    pub percent: Option<f64>,
    pub eta_seconds: Option<f64>,
    pub speed: Option<f64>,
}

/// Parse `HH:MM:SS(.ff)` into seconds.
pub fn parse_duration(text: &str) -> Option<f64> {
    let mut parts = text.trim().splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

struct Patterns {
    duration: Regex,
    time: Regex,
    speed: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| crate::Error::Other(format!("bad pattern {p}: {e}")))
        };
        Ok(Self {
            duration: compile(r"Duration: (\d+:\d+:\d+(?:\.\d+)?)")?,
            time: compile(r"time=(\d+:\d+:\d+(?:\.\d+)?)")?,
            speed: compile(r"speed=\s*(\d+(?:\.\d+)?)x")?,
        })
    }
}

/// Parse a status line given the total duration, if known.
pub fn parse_progress(line: &str, total: Option<f64>) -> Option<FfmpegProgress> {
    let patterns = Patterns::new().ok()?;
    parse_with(&patterns, line, total)
}

fn parse_with(patterns: &Patterns, line: &str, total: Option<f64>) -> Option<FfmpegProgress> {
    let current = parse_duration(patterns.time.captures(line)?.get(1)?.as_str())?;
    let (percent, eta_seconds) = match total.filter(|t| *t > 0.0) {
        Some(total) => (
            Some((current / total * 100.0).min(100.0)),
            Some((total - current).max(0.0)),
        ),
        None => (None, None),
    };
    let speed = patterns
        .speed
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok());

    Some(FfmpegProgress {
        current_seconds: current,
        percent,
        eta_seconds,
        speed,
    })
}

/// Read the next segment terminated by `\n` or `\r`; ffmpeg redraws its
/// status line with bare carriage returns.
async fn next_segment<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> std::io::Result<Option<String>> {
    let mut bytes = Vec::new();
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok((!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned()));
        }
        match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(pos) => {
                bytes.extend_from_slice(&buf[..pos]);
                reader.consume(pos + 1);
                return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
            }
            None => {
                let len = buf.len();
                bytes.extend_from_slice(buf);
                reader.consume(len);
            }
        }
    }
}

pub(super) async fn run(args: &[String]) -> Result<i32> {
    if args.is_empty() {
        Event::error("No ffmpeg arguments provided", None).emit();
        return Ok(1);
    }
    Event::info(format!("Running ffmpeg with {} arguments", args.len())).emit();

    let patterns = Patterns::new()?;
    let spawned = Command::new("ffmpeg")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Event::error(
                "ffmpeg not found - please install ffmpeg",
                Some("ffmpeg executable not found in PATH".to_string()),
            )
            .emit();
            return Ok(1);
        }
        Err(e) => return Err(e.into()),
    };

    let mut recent: Vec<String> = Vec::new();
    let mut total: Option<f64> = None;
    let mut last: Option<FfmpegProgress> = None;

    if let Some(stderr) = child.stderr.take() {
        let mut reader = BufReader::new(stderr);
        while let Some(line) = next_segment(&mut reader).await? {
            if line.trim().is_empty() {
                continue;
            }

            if total.is_none() {
                if let Some(found) = patterns
                    .duration
                    .captures(&line)
                    .and_then(|c| c.get(1))
                    .and_then(|m| parse_duration(m.as_str()))
                {
                    total = Some(found);
                    Event::info(format!("Processing video (duration: {found:.1}s)")).emit();
                }
            }

            if let Some(progress) = parse_with(&patterns, &line, total) {
                if last.as_ref() != Some(&progress) {
                    let mut message = format!("Processing: {:.1}s", progress.current_seconds);
                    if let Some(percent) = progress.percent {
                        message.push_str(&format!(" ({percent:.1}%)"));
                    }
                    Event::Progress {
                        message,
                        percent: progress.percent,
                        eta_seconds: progress.eta_seconds,
                    }
                    .emit();
                    last = Some(progress);
                }
                continue;
            }

            recent.push(line.trim().to_string());
            if recent.len() > 10 {
                recent.remove(0);
            }
        }
    }

    let status = child.wait().await?;
    let code = status.code().unwrap_or(1);
    if status.success() {
        Event::success("FFmpeg completed successfully").emit();
    } else {
        let details: Vec<&str> = recent
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(String::as_str)
            .collect();
        Event::error(
            format!("FFmpeg failed with exit code {code}"),
            Some(details.join("\n")),
        )
        .emit();
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert!((parse_duration("00:05:23.45").unwrap() - 323.45).abs() < 1e-9);
        assert_eq!(parse_duration("01:00:00"), Some(3600.0));
        assert_eq!(parse_duration("N/A"), None);
    }

    #[test]
    fn test_parse_progress_with_total() {
        let line = "frame=  240 fps=60 q=28.0 size=  1024kB time=00:00:30.00 bitrate= 279.6kbits/s speed=2.5x";
        let progress = parse_progress(line, Some(120.0)).unwrap();
        assert_eq!(progress.current_seconds, 30.0);
        assert_eq!(progress.percent, Some(25.0));
        assert_eq!(progress.eta_seconds, Some(90.0));
        assert_eq!(progress.speed, Some(2.5));
    }

    #[test]
    fn test_parse_progress_without_total() {
        let progress = parse_progress("size=0kB time=00:00:02.50 bitrate=N/A", None).unwrap();
        assert_eq!(progress.current_seconds, 2.5);
        assert_eq!(progress.percent, None);
        assert!(parse_progress("Stream mapping:", Some(10.0)).is_none());
    }

    #[test]
    fn test_percent_is_capped() {
        let progress = parse_progress("time=00:02:10.00", Some(120.0)).unwrap();
        assert_eq!(progress.percent, Some(100.0));
        assert_eq!(progress.eta_seconds, Some(0.0));
    }

    #[tokio::test]
    async fn test_carriage_return_segments() {
        let data: &[u8] = b"first\rsecond\r\nthird";
        let mut reader = BufReader::new(data);
        let mut seen = Vec::new();
        while let Some(seg) = next_segment(&mut reader).await.unwrap() {
            seen.push(seg);
        }
        assert_eq!(seen, vec!["first", "second", "", "third"]);
    }
}
