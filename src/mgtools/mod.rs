//! Media helper subcommands (`mediagram mgtools ...`).
//!
//! Each helper wraps an external program and reports on stdout using the
//! JSON-lines [`Event`] protocol, so tools can relay progress without
//! knowing the wrapped program's output format.

mod ffmpeg;
mod yt_dlp;

pub use ffmpeg::{parse_duration, parse_progress, FfmpegProgress};
pub use yt_dlp::{format_selector, parse_download_line, DownloadOptions};

/// Quality choices accepted by the yt-dlp helper.
pub fn yt_dlp_formats() -> &'static [&'static str] {
    yt_dlp::FORMATS
}

use clap::Subcommand;

use crate::tools::jsonl::Event;

/// Helper subcommands.
#[derive(Subcommand, Debug)]
pub enum MgtoolsCommand {
    /// Run ffmpeg and report progress as JSON lines
    Ffmpeg {
        /// Arguments passed to ffmpeg unchanged
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Run yt-dlp and report progress as JSON lines
    #[command(name = "yt-dlp")]
    YtDlp(DownloadOptions),
}

/// Run a helper and return its process exit code.
pub async fn run(command: MgtoolsCommand) -> i32 {
    let result = match command {
        MgtoolsCommand::Ffmpeg { args } => ffmpeg::run(&args).await,
        MgtoolsCommand::YtDlp(options) => yt_dlp::run(&options).await,
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            Event::error(format!("Unexpected error: {e}"), Some(e.to_string())).emit();
            1
        }
    }
}
