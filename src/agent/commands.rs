//! Slash-command router
//!
//! Input starting with `/` never reaches the model. The first word names the
//! command and the rest of the line is handed to the handler unparsed.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::config::{model_aliases, MIN_TOOL_OUTPUT_LIMIT};
use crate::error::Error;
use crate::media::{EntryRole, TranscriptEntry, TranscriptSink};
use crate::tools::adapter::truncate_output;
use crate::tools::sandbox;

use super::loop_impl::Agent;
use super::message::AgentResponse;

/// Command handler: the agent and the raw argument string after the name.
pub type CommandHandler = fn(&mut Agent, &str) -> AgentResponse;

const HELP: &str = "help";
const HELP_DESCRIPTION: &str = "Show available commands";

#[derive(Clone)]
struct Command {
    description: &'static str,
    handler: CommandHandler,
}

/// Name-unique command table. `help` is implicit and cannot be registered.
#[derive(Clone, Default)]
pub struct CommandRouter {
    commands: BTreeMap<String, Command>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with every built-in command.
    pub fn with_builtins() -> Self {
        let mut router = Self::new();
        router.register("clear", "Clear conversation history and start fresh", cmd_clear);
        router.register("model", "Change or show current model (usage: /model [haiku|sonnet])", cmd_model);
        router.register("tools", "List all available tools (usage: /tools [name])", cmd_tools);
        router.register("name", "Name the current conversation (usage: /name [name])", cmd_name);
        router.register(
            "turns",
            "Get or set maximum autonomous turns (usage: /turns [number], 0 = infinite)",
            cmd_turns,
        );
        router.register("tlimit", "Get or set tool output limit (usage: /tlimit [chars], min 128)", cmd_tlimit);
        router.register("tdetails", "Get or set tool details display (usage: /tdetails [on|off])", cmd_tdetails);
        router.register("read", "Show a file from the conversation directory (usage: /read PATH [MAX_CHARS])", cmd_read);
        router
    }

    /// Returns false, changing nothing, when the name is taken or reserved.
    pub fn register(&mut self, name: &str, description: &'static str, handler: CommandHandler) -> bool {
        if name == HELP || self.commands.contains_key(name) {
            return false;
        }
        self.commands
            .insert(name.to_string(), Command { description, handler });
        true
    }

    pub fn has(&self, name: &str) -> bool {
        name == HELP || self.commands.contains_key(name)
    }

    /// `(name, first description line)` for every command, help included, sorted by name.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let mut all: Vec<(String, String)> = self
            .commands
            .iter()
            .map(|(name, cmd)| (name.clone(), first_line(cmd.description).to_string()))
            .collect();
        all.push((HELP.to_string(), HELP_DESCRIPTION.to_string()));
        all.sort();
        all
    }

    pub fn help(&self) -> String {
        let mut lines = vec!["Available commands:".to_string()];
        for (name, description) in self.descriptions() {
            lines.push(format!("  /{name} - {description}"));
        }
        lines.join("\n")
    }

    /// Split `/name rest` into the command name and its raw arguments.
    pub fn parse(input: &str) -> Option<(&str, &str)> {
        let body = input.trim().strip_prefix('/')?;
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };
        Some((name, args))
    }

    /// Run a slash command against `agent` and record it in the transcript.
    pub fn dispatch(&self, agent: &mut Agent, input: &str) -> AgentResponse {
        let Some((name, args)) = Self::parse(input) else {
            return AgentResponse::error("Error: not a command", "not a command");
        };
        debug!(command = name, "Dispatching command");

        let response = if name == HELP {
            AgentResponse::text(self.help())
        } else {
            match self.commands.get(name) {
                Some(cmd) => (cmd.handler)(agent, args),
                None => {
                    let reason = format!("Unknown command: /{name}");
                    AgentResponse::error(format!("{reason}\n\n{}", self.help()), reason)
                }
            }
        };

        let logged = response.log_summary.as_deref().unwrap_or(&response.text);
        agent.media().record(
            TranscriptEntry::new(EntryRole::Command, logged)
                .with("command", name)
                .with("error", response.error.clone()),
        );
        response
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

/// Message of a media error without the variant prefix.
fn reason(err: &Error) -> String {
    match err {
        Error::Media(msg) | Error::Command(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn failure(reason: impl Into<String>) -> AgentResponse {
    let reason = reason.into();
    AgentResponse::error(format!("Error: {reason}"), reason)
}

fn cmd_clear(agent: &mut Agent, _args: &str) -> AgentResponse {
    match agent.clear() {
        Ok(()) => AgentResponse::text("Chat history cleared. Starting a new conversation."),
        Err(e) => failure(reason(&e)),
    }
}

fn cmd_model(agent: &mut Agent, args: &str) -> AgentResponse {
    let Some(alias) = args.split_whitespace().next() else {
        return AgentResponse::text(format!(
            "Current model: {}\nAvailable models: {}",
            agent.model_name(),
            model_aliases()
        ));
    };

    match agent.set_model(alias) {
        Ok(()) => AgentResponse::text(format!("Model changed to: {alias}")),
        Err(Error::Config(_)) => AgentResponse::error(
            format!("Unknown model: {alias}\nAvailable models: {}", model_aliases()),
            format!("Unknown model: {alias}"),
        ),
        Err(e) => failure(reason(&e)),
    }
}

fn param_lines(schema: &Value) -> Vec<String> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut names: Vec<&String> = props.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let prop = &props[name.as_str()];
            let kind = prop.get("type").and_then(Value::as_str).unwrap_or("any");
            let flag = if required.contains(&name.as_str()) { ", required" } else { "" };
            match prop.get("description").and_then(Value::as_str) {
                Some(desc) => format!("  {name} ({kind}{flag}): {desc}"),
                None => format!("  {name} ({kind}{flag})"),
            }
        })
        .collect()
}

fn cmd_tools(agent: &mut Agent, args: &str) -> AgentResponse {
    let registry = agent.tools();

    if let Some(name) = args.split_whitespace().next() {
        let name = name.trim_start_matches('/');
        let Some(tool) = registry.get(name) else {
            return AgentResponse::error(
                format!("Tool not found: {name}\nUse /tools to list available tools."),
                format!("Tool not found: {name}"),
            );
        };
        let mut lines = vec![tool.signature(), String::new(), tool.description().to_string()];
        let params = param_lines(&tool.parameters());
        if !params.is_empty() {
            lines.push(String::new());
            lines.push("Parameters:".to_string());
            lines.extend(params);
        }
        return AgentResponse::text(lines.join("\n"));
    }

    if registry.is_empty() {
        return AgentResponse::text("No tools available.");
    }
    let mut lines = vec!["Available tools:".to_string()];
    for tool in registry.iter() {
        let doc = tool
            .description()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("\n  {}", tool.signature()));
        lines.push(format!("    {doc}"));
    }
    AgentResponse::text(lines.join("\n"))
}

fn cmd_name(agent: &mut Agent, args: &str) -> AgentResponse {
    let name = Some(args.trim()).filter(|n| !n.is_empty());
    let media = agent.media();

    let renamed = media
        .current_subdir()
        .and_then(|_| media.rename_subdir(name));
    match renamed {
        Ok(dir) => {
            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.is_some() {
                AgentResponse::text(format!("Conversation named: {dir_name}"))
            } else {
                AgentResponse::text(format!("Conversation made permanent: {dir_name}"))
            }
        }
        Err(e) => failure(reason(&e)),
    }
}

fn cmd_turns(agent: &mut Agent, args: &str) -> AgentResponse {
    let Some(arg) = args.split_whitespace().next() else {
        return match agent.max_turns() {
            0 => AgentResponse::text("Current max turns: infinite (0)"),
            n => AgentResponse::text(format!("Current max turns: {n}")),
        };
    };

    match arg.parse::<i64>() {
        Ok(n) if n < 0 => failure("turns must be 0 (infinite) or a positive number"),
        Ok(n) => {
            let turns = n as usize;
            agent.set_max_turns(turns);
            if turns == 0 {
                AgentResponse::text("Max turns set to: infinite (0)")
            } else {
                AgentResponse::text(format!("Max turns set to: {turns}"))
            }
        }
        Err(_) => failure("turns must be a number (0 for infinite)"),
    }
}

fn cmd_tlimit(agent: &mut Agent, args: &str) -> AgentResponse {
    let Some(arg) = args.split_whitespace().next() else {
        return AgentResponse::text(format!(
            "Current tool output limit: {} characters",
            agent.tool_output_limit()
        ));
    };

    match arg.parse::<i64>() {
        Ok(n) if n < MIN_TOOL_OUTPUT_LIMIT as i64 => failure(format!(
            "tool output limit must be at least {MIN_TOOL_OUTPUT_LIMIT} characters"
        )),
        Ok(n) => {
            agent.set_tool_output_limit(n as usize);
            AgentResponse::text(format!("Tool output limit set to: {n} characters"))
        }
        Err(_) => failure(format!("limit must be a number (minimum {MIN_TOOL_OUTPUT_LIMIT})")),
    }
}

fn cmd_tdetails(agent: &mut Agent, args: &str) -> AgentResponse {
    let Some(arg) = args.split_whitespace().next() else {
        let status = if agent.tool_details() { "on" } else { "off" };
        return AgentResponse::text(format!("Tool details: {status}"));
    };

    match arg.to_lowercase().as_str() {
        "on" => {
            agent.set_tool_details(true);
            AgentResponse::text("Tool details enabled")
        }
        "off" => {
            agent.set_tool_details(false);
            AgentResponse::text("Tool details disabled")
        }
        _ => failure("argument must be 'on' or 'off'"),
    }
}

fn cmd_read(agent: &mut Agent, args: &str) -> AgentResponse {
    let mut parts = args.split_whitespace();
    let Some(path) = parts.next() else {
        return failure("usage: /read PATH [MAX_CHARS]");
    };
    let limit = match parts.next().map(str::parse::<usize>) {
        None => agent.tool_output_limit(),
        Some(Ok(n)) if n > 0 => n,
        Some(_) => return failure("MAX_CHARS must be a positive number"),
    };

    let resolved = agent
        .media()
        .current_subdir()
        .and_then(|root| sandbox::ensure_contained(&root, path));
    let file = match resolved {
        Ok(file) => file,
        Err(e) => return failure(reason(&e)),
    };
    if !file.exists() {
        return failure(format!("File not found: {path}"));
    }
    if !file.is_file() {
        return failure(format!("Not a file: {path}"));
    }

    let bytes = match std::fs::read(&file) {
        Ok(bytes) => bytes,
        Err(e) => return failure(format!("Could not read {path}: {e}")),
    };
    let content = String::from_utf8_lossy(&bytes);
    let total = content.chars().count();
    AgentResponse::text(truncate_output(&content, limit))
        .with_log_summary(format!("Read {path} ({total} characters)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::loop_impl::tests::test_agent;
    use crate::media::MESSAGES_FILE;

    fn noop(_agent: &mut Agent, _args: &str) -> AgentResponse {
        AgentResponse::text("noop")
    }

    #[test]
    fn test_parse() {
        assert_eq!(CommandRouter::parse("/turns 5"), Some(("turns", "5")));
        assert_eq!(CommandRouter::parse("  /name  My Trip "), Some(("name", "My Trip")));
        assert_eq!(CommandRouter::parse("/help"), Some(("help", "")));
        assert_eq!(CommandRouter::parse("hello"), None);
    }

    #[test]
    fn test_register_rules() {
        let mut router = CommandRouter::new();
        assert!(router.register("ping", "Ping\nmore text", noop));
        assert!(!router.register("ping", "Other", noop));
        assert!(!router.register("help", "Shadow", noop));
        assert!(router.has("help"));

        assert_eq!(
            router.help(),
            "Available commands:\n  /help - Show available commands\n  /ping - Ping"
        );
    }

    #[test]
    fn test_help_is_sorted() {
        let router = CommandRouter::with_builtins();
        let names: Vec<String> = router.descriptions().into_iter().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"tdetails".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_command_embeds_help() {
        let (_tmp, mut agent, _client) = test_agent();
        let response = agent.handle_command("/bogus");
        assert!(response.text.starts_with("Unknown command: /bogus\n\nAvailable commands:"));
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_turns_command() {
        let (_tmp, mut agent, _client) = test_agent();

        assert_eq!(agent.handle_command("/turns 5").text, "Max turns set to: 5");
        assert_eq!(agent.max_turns(), 5);
        assert_eq!(agent.handle_command("/turns").text, "Current max turns: 5");

        let negative = agent.handle_command("/turns -1");
        assert_eq!(negative.text, "Error: turns must be 0 (infinite) or a positive number");
        assert_eq!(agent.max_turns(), 5);

        let junk = agent.handle_command("/turns lots");
        assert_eq!(junk.text, "Error: turns must be a number (0 for infinite)");

        assert_eq!(agent.handle_command("/turns 0").text, "Max turns set to: infinite (0)");
        assert_eq!(agent.handle_command("/turns").text, "Current max turns: infinite (0)");
    }

    #[tokio::test]
    async fn test_tlimit_and_tdetails_commands() {
        let (_tmp, mut agent, _client) = test_agent();

        let low = agent.handle_command("/tlimit 50");
        assert_eq!(low.text, "Error: tool output limit must be at least 128 characters");
        assert_eq!(agent.handle_command("/tlimit abc").text, "Error: limit must be a number (minimum 128)");
        assert_eq!(agent.handle_command("/tlimit 500").text, "Tool output limit set to: 500 characters");
        assert_eq!(agent.tool_output_limit(), 500);

        assert_eq!(agent.handle_command("/tdetails").text, "Tool details: off");
        assert_eq!(agent.handle_command("/tdetails ON").text, "Tool details enabled");
        assert!(agent.tool_details());
        assert_eq!(agent.handle_command("/tdetails maybe").text, "Error: argument must be 'on' or 'off'");
        assert!(agent.tool_details());
    }

    #[tokio::test]
    async fn test_model_command_keeps_history() {
        let (_tmp, mut agent, client) = test_agent();
        client.push(crate::agent::LlmResponse::text("hi"));
        agent.handle_message("hello", &crate::agent::UserIdentity::new("T")).await;
        let before = agent.history().len();

        assert_eq!(
            agent.handle_command("/model").text,
            "Current model: haiku\nAvailable models: haiku, sonnet"
        );
        assert_eq!(agent.handle_command("/model sonnet").text, "Model changed to: sonnet");
        assert_eq!(agent.model_name(), "sonnet");
        assert_eq!(agent.history().len(), before);

        let unknown = agent.handle_command("/model gpt");
        assert_eq!(unknown.text, "Unknown model: gpt\nAvailable models: haiku, sonnet");
        assert_eq!(agent.model_name(), "sonnet");
    }

    #[tokio::test]
    async fn test_clear_rotates_session() {
        let (_tmp, mut agent, client) = test_agent();
        client.push(crate::agent::LlmResponse::text("hi"));
        agent.handle_message("hello", &crate::agent::UserIdentity::new("T")).await;
        let first = agent.media().session_dir().unwrap();

        let response = agent.handle_command("/clear");
        assert_eq!(response.text, "Chat history cleared. Starting a new conversation.");
        assert!(agent.history().is_empty());
        let second = agent.media().session_dir().unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
    }

    #[tokio::test]
    async fn test_name_command_and_collision() {
        let (_tmp, mut agent, _client) = test_agent();

        let named = agent.handle_command("/name My Trip!");
        assert!(named.text.starts_with("Conversation named: "), "{}", named.text);
        assert!(named.text.ends_with("-my-trip"));
        let dir = agent.media().session_dir().unwrap();
        assert!(dir.exists());

        // A fresh session whose promoted name is already taken.
        agent.handle_command("/clear");
        let session = agent.media().session_dir().unwrap();
        let stamp: String = session
            .file_name()
            .unwrap()
            .to_string_lossy()
            .trim_start_matches('.')
            .chars()
            .take(15)
            .collect();
        std::fs::create_dir_all(agent.media().root().join(format!("{stamp}-x"))).unwrap();
        let collision = agent.handle_command("/name x");
        assert!(collision.text.starts_with("Error: Directory"));
        assert!(collision.error.is_some());
        assert_eq!(agent.media().session_dir().unwrap(), session);
    }

    #[tokio::test]
    async fn test_tools_command() {
        let (_tmp, mut agent, _client) = test_agent();

        let listing = agent.handle_command("/tools");
        assert!(listing.text.starts_with("Available tools:"));
        assert!(listing.text.contains("\n  demo(count?: integer, path: string)\n    Scripted tool for tests. Second line."));

        let detail = agent.handle_command("/tools demo");
        assert!(detail.text.contains("Scripted tool for tests.\nSecond line."));
        assert!(detail.text.contains("  path (string, required)"));

        let missing = agent.handle_command("/tools nope");
        assert!(missing.text.starts_with("Tool not found: nope"));
    }

    #[tokio::test]
    async fn test_read_command() {
        let (_tmp, mut agent, _client) = test_agent();
        let session = agent.media().current_subdir().unwrap();
        std::fs::write(session.join("notes.txt"), "x".repeat(400)).unwrap();

        let full = agent.handle_command("/read notes.txt");
        assert_eq!(full.text, "x".repeat(400));
        assert_eq!(full.log_summary.as_deref(), Some("Read notes.txt (400 characters)"));

        let short = agent.handle_command("/read notes.txt 200");
        assert!(short.text.contains("more specific parameters"));

        let escape = agent.handle_command("/read ../../etc/passwd");
        assert!(escape.text.contains("outside the working directory"));
        assert!(agent.handle_command("/read missing.txt").text.starts_with("Error: File not found"));
    }

    #[tokio::test]
    async fn test_commands_are_logged() {
        let (_tmp, mut agent, _client) = test_agent();
        agent.handle_command("/turns 3");
        let session = agent.media().session_dir().unwrap();
        let log = std::fs::read_to_string(session.join(MESSAGES_FILE)).unwrap();
        let entry: Value = serde_json::from_str(log.lines().last().unwrap()).unwrap();
        assert_eq!(entry["role"], "command");
        assert_eq!(entry["command"], "turns");
        assert_eq!(entry["content"], "Max turns set to: 3");
        assert!(entry.get("timestamp").is_some());
    }
}
