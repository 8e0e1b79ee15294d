//! Error types for mediagram

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for mediagram operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mediagram
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Media error: {0}")]
    Media(String),

    /// A tool or command tried to reach outside the active session directory.
    #[error("Path {} is outside the working directory", path.display())]
    Containment { path: PathBuf },

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
