//! System prompt rendering

use chrono::Local;

use super::message::UserIdentity;

const UNLIMITED: &str = "unlimited";

/// `Name: ...` plus username and language lines when known.
pub fn user_info_text(user: &UserIdentity) -> String {
    let mut parts = vec![format!("Name: {}", user.name)];
    if let Some(username) = user.username.as_deref().filter(|u| !u.is_empty()) {
        parts.push(format!("Username: {username}"));
    }
    if let Some(language) = user.language.as_deref().filter(|l| !l.is_empty()) {
        parts.push(format!("Language: {language}"));
    }
    parts.join("\n")
}

/// Fill the template placeholders. A `max_turns` of 0 renders both turn
/// counts as "unlimited"; a missing `remaining` renders the full budget.
pub fn render_system_prompt(
    template: &str,
    user: &UserIdentity,
    max_turns: usize,
    remaining: Option<usize>,
) -> String {
    let datetime = Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string();
    let (max, remaining) = if max_turns == 0 {
        (UNLIMITED.to_string(), UNLIMITED.to_string())
    } else {
        (max_turns.to_string(), remaining.unwrap_or(max_turns).to_string())
    };

    template
        .replace("{{ user_information }}", &user_info_text(user))
        .replace("{{ datetime }}", datetime.trim())
        .replace("{{ max_turns }}", &max)
        .replace("{{ remaining_turns }}", &remaining)
}
