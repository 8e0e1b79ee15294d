//! Filesystem tools - list, search and rename inside the session directory

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Emitter, Tool, ToolContext, ToolFailure, ToolResult};
use crate::media::MESSAGES_FILE;

/// Session root, canonicalized so relative display paths line up with resolved ones.
fn session_root(ctx: &ToolContext) -> Result<PathBuf, ToolFailure> {
    Ok(ctx.cwd.canonicalize()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// Every entry below `dir`, depth first. Symlinked directories are not followed.
fn walk(dir: &Path, include_hidden: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !include_hidden && is_hidden(&path) {
            continue;
        }
        let is_real_dir = std::fs::symlink_metadata(&path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        out.push(path.clone());
        if is_real_dir {
            walk(&path, include_hidden, out)?;
        }
    }
    Ok(())
}

/// List directory contents with size and type
pub struct ListDirTool;

#[derive(Deserialize)]
struct ListDirArgs {
    #[serde(default, alias = "cwd")]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    hidden: bool,
}

fn format_entry(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let (kind, size) = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => ("symlink", 0),
        Ok(meta) if meta.is_dir() => ("dir", 0),
        Ok(meta) if meta.is_file() => ("file", meta.len()),
        _ => ("other", 0),
    };
    format!("{}  {:>10}  {}", rel.display(), size, kind)
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "listdir"
    }

    fn description(&self) -> &str {
        "List directory contents with size and type information.\n\
         Paths are relative to the conversation's media directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative directory to list (default: the media directory itself)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List recursively (default: false)"
                },
                "hidden": {
                    "type": "boolean",
                    "description": "Include entries starting with '.' (default: false)"
                }
            }
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: ListDirArgs = parse_args(self.name(), args)?;
        let root = session_root(ctx)?;
        let shown = args.path.as_deref().unwrap_or(".");
        let target = match &args.path {
            Some(path) => ctx.resolve(path)?,
            None => root.clone(),
        };

        if !target.exists() {
            out.error(format!("Directory does not exist: {shown}"));
            return Ok(());
        }
        if !target.is_dir() {
            out.error(format!("Not a directory: {shown}"));
            return Ok(());
        }

        let mut entries = Vec::new();
        if args.recursive {
            walk(&target, args.hidden, &mut entries)?;
        } else {
            for entry in std::fs::read_dir(&target)? {
                let path = entry?.path();
                if args.hidden || !is_hidden(&path) {
                    entries.push(path);
                }
            }
        }
        entries.sort();

        if entries.is_empty() {
            out.success("(empty directory)");
        } else {
            let lines: Vec<String> = entries.iter().map(|p| format_entry(p, &root)).collect();
            out.success(lines.join("\n"));
        }
        Ok(())
    }
}

/// Search file contents with optional context lines
pub struct GrepTool;

#[derive(Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    is_regex: bool,
    #[serde(default)]
    pre: usize,
    #[serde(default)]
    post: usize,
}

/// Render the matches of one file, or `None` when nothing matched.
///
/// Matching lines are marked with `>`, context lines with a space, and
/// non-adjacent windows are separated by `...`.
fn render_matches(lines: &[&str], pattern: &Regex, rel: &Path, pre: usize, post: usize) -> Option<String> {
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| pattern.is_match(line))
        .map(|(i, _)| i)
        .collect();
    if hits.is_empty() {
        return None;
    }
    let hit_set: HashSet<usize> = hits.iter().copied().collect();

    let mut rendered = vec![format!("--- {} ---", rel.display())];
    let mut last_shown: Option<usize> = None;
    for &hit in &hits {
        let start = hit.saturating_sub(pre);
        let end = hit.saturating_add(post).saturating_add(1).min(lines.len());
        let first_new = match last_shown {
            Some(last) if start <= last => last + 1,
            Some(_) => {
                rendered.push("...".to_string());
                start
            }
            None => start,
        };
        for (i, line) in lines.iter().enumerate().take(end).skip(first_new) {
            let marker = if hit_set.contains(&i) { '>' } else { ' ' };
            rendered.push(format!("{} {:>4} {}", marker, i + 1, line.trim_end()));
            last_shown = Some(i);
        }
    }
    Some(rendered.join("\n"))
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for a pattern in every file of the media directory, with optional context lines."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Text to search for"
                },
                "is_regex": {
                    "type": "boolean",
                    "description": "Treat the pattern as a regular expression (default: literal text)"
                },
                "pre": {
                    "type": "integer",
                    "description": "Context lines before each match"
                },
                "post": {
                    "type": "integer",
                    "description": "Context lines after each match"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: GrepArgs = parse_args(self.name(), args)?;
        let source = if args.is_regex {
            args.pattern.clone()
        } else {
            regex::escape(&args.pattern)
        };
        let pattern = match Regex::new(&source) {
            Ok(re) => re,
            Err(e) => {
                out.error(format!("Invalid regex: {e}"));
                return Ok(());
            }
        };

        let root = session_root(ctx)?;
        let mut files = Vec::new();
        walk(&root, true, &mut files)?;
        files.sort();

        let mut blocks = Vec::new();
        for path in files.iter().filter(|p| p.is_file()) {
            let rel = path.strip_prefix(&root).unwrap_or(path);
            if rel == Path::new(MESSAGES_FILE) {
                continue;
            }
            let Ok(bytes) = std::fs::read(path) else { continue };
            let content = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = content.lines().collect();
            if let Some(block) = render_matches(&lines, &pattern, rel, args.pre, args.post) {
                blocks.push(block);
            }
        }

        if blocks.is_empty() {
            out.success("No matches found");
        } else {
            out.success(blocks.join("\n\n"));
        }
        Ok(())
    }
}

/// Rename files or directories, all or nothing
pub struct RenameTool;

#[derive(Deserialize)]
struct RenameArgs {
    old: Vec<String>,
    new: Vec<String>,
}

#[async_trait]
impl Tool for RenameTool {
    fn name(&self) -> &str {
        "rename"
    }

    fn description(&self) -> &str {
        "Rename files or directories. old[i] is renamed to new[i].\n\
         Every pair is checked before anything is moved."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "old": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Current paths, relative to the media directory"
                },
                "new": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "New paths, relative to the media directory"
                }
            },
            "required": ["old", "new"]
        })
    }

    async fn run(&self, args: Value, ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: RenameArgs = parse_args(self.name(), args)?;
        if args.old.len() != args.new.len() {
            out.error("old and new must have same length");
            return Ok(());
        }

        let mut plan = Vec::with_capacity(args.old.len());
        let mut destinations = HashSet::new();
        for (old, new) in args.old.iter().zip(&args.new) {
            let from = ctx.resolve(old)?;
            let to = ctx.resolve(new)?;

            if !from.exists() {
                out.error(format!("Source does not exist: {old}"));
                return Ok(());
            }
            if to.exists() || !destinations.insert(to.clone()) {
                out.error(format!("Destination already exists: {new}"));
                return Ok(());
            }
            plan.push((from, to));
        }

        for (from, to) in &plan {
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(from, to)?;
        }

        let renamed: Vec<String> = args
            .old
            .iter()
            .zip(&args.new)
            .map(|(o, n)| format!("{o} → {n}"))
            .collect();
        out.success(format!("Renamed: {}", renamed.join(", ")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::adapter::invoke;
    use tempfile::TempDir;

    fn session() -> (TempDir, ToolContext) {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());
        (tmp, ctx)
    }

    #[tokio::test]
    async fn test_listdir_sizes_and_hidden() {
        let (tmp, ctx) = session();
        std::fs::write(tmp.path().join("a.txt"), "hello").unwrap();
        std::fs::write(tmp.path().join(".secret"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("clips")).unwrap();
        std::fs::write(tmp.path().join("clips/b.mp4"), "1234567890").unwrap();

        let flat = invoke(&ListDirTool, json!({}), &ctx).await;
        assert_eq!(
            flat,
            format!("a.txt  {:>10}  file\nclips  {:>10}  dir", 5, 0)
        );

        let all = invoke(&ListDirTool, json!({"recursive": true, "hidden": true}), &ctx).await;
        assert!(all.contains(".secret"));
        assert!(all.contains(&format!("clips/b.mp4  {:>10}  file", 10)));
    }

    #[tokio::test]
    async fn test_listdir_errors() {
        let (tmp, ctx) = session();
        std::fs::write(tmp.path().join("f"), "").unwrap();

        assert_eq!(
            invoke(&ListDirTool, json!({"path": "missing"}), &ctx).await,
            "Directory does not exist: missing"
        );
        assert_eq!(invoke(&ListDirTool, json!({"path": "f"}), &ctx).await, "Not a directory: f");
        assert!(invoke(&ListDirTool, json!({"path": "../"}), &ctx)
            .await
            .starts_with("Error:"));
        assert_eq!(
            invoke(&ListDirTool, json!({}), &ctx).await,
            format!("f  {:>10}  file", 0)
        );
    }

    #[tokio::test]
    async fn test_grep_with_context() {
        let (tmp, ctx) = session();
        std::fs::write(
            tmp.path().join("notes.txt"),
            "one\ntwo\nneedle here\nfour\nfive\nsix\nseven\nneedle again\nnine\n",
        )
        .unwrap();

        let result = invoke(&GrepTool, json!({"pattern": "needle", "pre": 1, "post": 1}), &ctx).await;
        let expected = [
            "--- notes.txt ---",
            "     2 two",
            ">    3 needle here",
            "     4 four",
            "...",
            "     7 seven",
            ">    8 needle again",
            "     9 nine",
        ]
        .join("\n");
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn test_grep_huge_context_is_clamped() {
        let (tmp, ctx) = session();
        std::fs::write(tmp.path().join("a.txt"), "hello\nworld\n").unwrap();

        let result = invoke(
            &GrepTool,
            json!({"pattern": "hello", "pre": u64::MAX, "post": u64::MAX}),
            &ctx,
        )
        .await;
        assert_eq!(result, "--- a.txt ---\n>    1 hello\n     2 world");
    }

    #[tokio::test]
    async fn test_grep_literal_vs_regex() {
        let (tmp, ctx) = session();
        std::fs::write(tmp.path().join("a.txt"), "price: 3.50\nprice: 3x50\n").unwrap();

        let literal = invoke(&GrepTool, json!({"pattern": "3.50"}), &ctx).await;
        assert_eq!(literal, "--- a.txt ---\n>    1 price: 3.50");

        let regex = invoke(&GrepTool, json!({"pattern": "3.50", "is_regex": true}), &ctx).await;
        assert!(regex.contains(">    2 price: 3x50"));

        let bad = invoke(&GrepTool, json!({"pattern": "(", "is_regex": true}), &ctx).await;
        assert!(bad.starts_with("Invalid regex"));

        let none = invoke(&GrepTool, json!({"pattern": "absent"}), &ctx).await;
        assert_eq!(none, "No matches found");
    }

    #[tokio::test]
    async fn test_rename_validates_before_mutating() {
        let (tmp, ctx) = session();
        std::fs::write(tmp.path().join("a"), "").unwrap();
        std::fs::write(tmp.path().join("b"), "").unwrap();

        let result = invoke(&RenameTool, json!({"old": ["a", "missing"], "new": ["x", "y"]}), &ctx).await;
        assert_eq!(result, "Source does not exist: missing");
        assert!(tmp.path().join("a").exists());
        assert!(!tmp.path().join("x").exists());

        let result = invoke(&RenameTool, json!({"old": ["a", "b"], "new": ["z", "z"]}), &ctx).await;
        assert_eq!(result, "Destination already exists: z");
        assert!(tmp.path().join("a").exists());

        let escape = invoke(&RenameTool, json!({"old": ["a"], "new": ["../a"]}), &ctx).await;
        assert!(escape.starts_with("Error:"));
        assert!(tmp.path().join("a").exists());

        let ok = invoke(&RenameTool, json!({"old": ["a", "b"], "new": ["dir/a2", "b2"]}), &ctx).await;
        assert_eq!(ok, "Renamed: a → dir/a2, b → b2");
        assert!(tmp.path().join("dir/a2").exists());
        assert!(tmp.path().join("b2").exists());
    }

    #[tokio::test]
    async fn test_rename_length_mismatch() {
        let (_tmp, ctx) = session();
        let result = invoke(&RenameTool, json!({"old": ["a"], "new": []}), &ctx).await;
        assert_eq!(result, "old and new must have same length");
    }
}
