//! mediagram - conversational media agent
//!
//! This library provides the agent loop, the tool protocol and built-in
//! media tools, the per-conversation media sessions, and the CLI and
//! Telegram front-ends.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod media;
pub mod mgtools;
pub mod templates;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
