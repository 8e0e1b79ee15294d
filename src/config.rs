//! Configuration management
//!
//! Settings live in `~/.mediagram.d/config.json`. Secrets may also come from the
//! environment, which is seeded from `.env` or `~/.mediagram.d/dotenv`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::Result;

/// Smallest accepted tool output limit, in characters.
pub const MIN_TOOL_OUTPUT_LIMIT: usize = 128;
pub const DEFAULT_TOOL_OUTPUT_LIMIT: usize = 16384;
pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_TOOL_DETAILS: bool = false;
pub const DEFAULT_MODEL: &str = "haiku";

/// Model aliases accepted by `--model` and `/model`, with the API model id.
pub const AVAILABLE_MODELS: &[(&str, &str)] = &[
    ("haiku", "claude-haiku-4-5"),
    ("sonnet", "claude-sonnet-4-5"),
];

/// Map a model alias to its API model id.
pub fn resolve_model(alias: &str) -> Option<&'static str> {
    AVAILABLE_MODELS
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, id)| *id)
}

/// Comma separated list of model aliases, for messages.
pub fn model_aliases() -> String {
    AVAILABLE_MODELS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Model alias ("haiku" or "sonnet")
    #[serde(default = "default_model")]
    pub model: String,

    /// Autonomous turn budget, 0 for unlimited
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Maximum characters of tool output handed back to the model
    #[serde(default = "default_tool_output_limit")]
    pub tool_output_limit: usize,

    /// Show tool invocation arguments in front-ends
    #[serde(default)]
    pub tool_details: bool,

    /// Media root override
    #[serde(default)]
    pub media_dir: Option<PathBuf>,

    #[serde(default)]
    pub anthropic_api_key: String,

    /// Alternate Messages API endpoint (proxies, tests)
    #[serde(default)]
    pub anthropic_base_url: Option<String>,

    /// AssemblyAI key used by the transcribe tool
    #[serde(default)]
    pub assemblyai_api_key: String,

    #[serde(default)]
    pub telegram: TelegramConfig,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

fn default_tool_output_limit() -> usize {
    DEFAULT_TOOL_OUTPUT_LIMIT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,

    /// Usernames or numeric ids allowed to talk to the bot; empty allows everyone
    #[serde(default)]
    pub allow_from: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_turns: DEFAULT_MAX_TURNS,
            tool_output_limit: DEFAULT_TOOL_OUTPUT_LIMIT,
            tool_details: DEFAULT_TOOL_DETAILS,
            media_dir: None,
            anthropic_api_key: String::new(),
            anthropic_base_url: None,
            assemblyai_api_key: String::new(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Config {
    /// Fill secrets from environment variables. Values already set in the file win.
    pub fn merge_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut String, key: &str| {
            if slot.is_empty() {
                if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                    *slot = value;
                }
            }
        };
        fill(&mut self.anthropic_api_key, "ANTHROPIC_API_KEY");
        fill(&mut self.assemblyai_api_key, "ASSEMBLY_AI_KEY");
        fill(&mut self.telegram.token, "TELEGRAM_BOT_TOKEN");
        if self.anthropic_base_url.is_none() {
            self.anthropic_base_url = lookup("ANTHROPIC_BASE_URL").filter(|v| !v.is_empty());
        }
    }

    /// Reject settings the agent could not run with.
    pub fn validate(&self) -> Result<()> {
        if resolve_model(&self.model).is_none() {
            return Err(Error::Config(format!(
                "Unknown model '{}'. Available models: {}",
                self.model,
                model_aliases()
            )));
        }
        if self.tool_output_limit < MIN_TOOL_OUTPUT_LIMIT {
            return Err(Error::Config(format!(
                "tool output limit must be at least {MIN_TOOL_OUTPUT_LIMIT} characters"
            )));
        }
        Ok(())
    }
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mediagram.d")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load `.env` from the working directory, falling back to `~/.mediagram.d/dotenv`.
pub fn load_environment() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(_) => {
            let fallback = config_dir().join("dotenv");
            if fallback.exists() {
                if let Err(e) = dotenvy::from_path(&fallback) {
                    debug!("Failed to load {}: {}", fallback.display(), e);
                }
            }
        }
    }
}

/// Load configuration from the default location, merged with the environment.
///
/// A missing file is not an error: defaults are used.
pub fn load() -> Result<Config> {
    let mut config = load_from(&config_path())?;
    config.merge_env(|key| std::env::var(key).ok());
    Ok(config)
}

/// Load configuration from a specific file
pub fn load_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save(config: &Config) -> Result<()> {
    save_to(config, &config_path())
}

pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Interactive setup wizard
pub fn onboard() -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Select, Text};

    let prompt_err = |e: inquire::InquireError| Error::Config(format!("Prompt failed: {}", e));

    ui::print_header("Setup Wizard", "local");
    println!("  Welcome! A few questions and mediagram is ready.\n");

    let mut config = load_from(&config_path())?;

    let aliases: Vec<&str> = AVAILABLE_MODELS.iter().map(|(name, _)| *name).collect();
    config.model = Select::new("Default model:", aliases)
        .prompt()
        .map_err(prompt_err)?
        .to_string();

    let key = Text::new("Anthropic API key (leave empty to use ANTHROPIC_API_KEY):")
        .prompt()
        .map_err(prompt_err)?;
    if !key.trim().is_empty() {
        config.anthropic_api_key = key.trim().to_string();
    }

    let key = Text::new("AssemblyAI API key (optional):")
        .prompt()
        .map_err(prompt_err)?;
    if !key.trim().is_empty() {
        config.assemblyai_api_key = key.trim().to_string();
    }

    let media_root = config_dir().join("media");
    let create_media = Confirm::new(&format!("Keep media in {}?", media_root.display()))
        .with_default(true)
        .prompt()
        .map_err(prompt_err)?;
    if create_media {
        ui::print_thinking("Creating media directory");
        std::fs::create_dir_all(&media_root)?;
    }

    let telegram = Confirm::new("Set up a Telegram bot?")
        .with_default(false)
        .prompt()
        .map_err(prompt_err)?;
    if telegram {
        setup_telegram(&mut config)?;
    }

    ui::print_thinking("Saving configuration");
    save(&config)?;

    println!();
    ui::print_success("Setup complete!");
    ui::print_step("Run 'mediagram run cli' to start chatting.");
    Ok(())
}

fn setup_telegram(config: &mut Config) -> Result<()> {
    use colored::Colorize;
    use inquire::Text;

    use crate::ui;

    println!();
    ui::print_step("To create a Telegram bot:");
    println!("    1. Message {} on Telegram", "@BotFather".cyan().bold());
    println!("    2. Send {} and choose a name", "/newbot".cyan());
    println!("    3. Copy the {} provided", "API Token".cyan());
    println!();

    let token = Text::new("Telegram bot token:")
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    if token.trim().is_empty() {
        return Err(Error::Config("Token cannot be empty".to_string()));
    }
    config.telegram.token = token.trim().to_string();

    let user = whoami::username();
    let allowed = Text::new("Telegram usernames allowed to use the bot (comma separated):")
        .with_default(&user)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.telegram.allow_from = allowed
        .split(',')
        .map(|s| s.trim().trim_start_matches('@').to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_model() {
        assert_eq!(resolve_model("haiku"), Some("claude-haiku-4-5"));
        assert_eq!(resolve_model("sonnet"), Some("claude-sonnet-4-5"));
        assert_eq!(resolve_model("opus"), None);
        assert_eq!(model_aliases(), "haiku, sonnet");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_from(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(config.model, "haiku");
        assert_eq!(config.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(config.tool_output_limit, DEFAULT_TOOL_OUTPUT_LIMIT);
        assert!(!config.tool_details);
    }

    #[test]
    fn test_partial_file_and_save_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"model": "sonnet", "max_turns": 0}"#).unwrap();

        let mut config = load_from(&path).unwrap();
        assert_eq!(config.model, "sonnet");
        assert_eq!(config.max_turns, 0);
        assert_eq!(config.tool_output_limit, DEFAULT_TOOL_OUTPUT_LIMIT);

        config.telegram.allow_from = vec!["alice".to_string()];
        save_to(&config, &path).unwrap();
        let reloaded = load_from(&path).unwrap();
        assert_eq!(reloaded.telegram.allow_from, vec!["alice".to_string()]);
    }

    #[test]
    fn test_merge_env_keeps_file_values() {
        let env: HashMap<&str, &str> = [
            ("ANTHROPIC_API_KEY", "from-env"),
            ("ASSEMBLY_AI_KEY", "aai"),
            ("TELEGRAM_BOT_TOKEN", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            telegram: TelegramConfig {
                token: "from-file".to_string(),
                allow_from: vec![],
            },
            ..Config::default()
        };
        config.merge_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.anthropic_api_key, "from-env");
        assert_eq!(config.assemblyai_api_key, "aai");
        assert_eq!(config.telegram.token, "from-file");
        assert_eq!(config.anthropic_base_url, None);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let bad_model = Config { model: "gpt".to_string(), ..Config::default() };
        assert!(bad_model.validate().is_err());

        let small = Config { tool_output_limit: 10, ..Config::default() };
        assert!(small.validate().is_err());
    }
}
