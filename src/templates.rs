//! Prompt templates embedded at compile time from `templates/`.

/// System prompt. Placeholders: `{{ user_information }}`, `{{ datetime }}`,
/// `{{ max_turns }}` and `{{ remaining_turns }}`.
pub const SYSTEM_PROMPT: &str = include_str!("../templates/system.md");
