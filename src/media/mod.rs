//! Media root selection and per-conversation session directories.
//!
//! Each conversation works inside one session directory under the media
//! root. A session starts anonymous (`.YYYYMMDD-HHMMSS.N`), can be promoted
//! to a permanent name with `/name`, and is replaced by a fresh one on
//! `/clear`. The directory also holds the conversation's `messages.jsonl`.

mod transcript;

pub use transcript::{EntryRole, TranscriptEntry, TranscriptSink};

#[cfg(test)]
pub use transcript::MemoryTranscript;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Local;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::Result;

/// Transcript file kept in every session directory.
pub const MESSAGES_FILE: &str = "messages.jsonl";

/// Length of the `YYYYMMDD-HHMMSS` token that prefixes session names.
const TIMESTAMP_LEN: usize = 15;

/// Owns the media root and the active session directory of one conversation.
pub struct MediaManager {
    root: PathBuf,
    current: Mutex<Option<PathBuf>>,
    // Held so the ephemeral root lives as long as the manager.
    ephemeral: Option<TempDir>,
}

impl MediaManager {
    /// Pick a media root: the override, then `/media` when writable, then
    /// `~/.mediagram.d/media` when present, then a temporary directory.
    pub fn create(override_dir: Option<&Path>) -> Result<Self> {
        let home_media = dirs::home_dir().map(|h| h.join(".mediagram.d").join("media"));
        Self::create_with(override_dir, Path::new("/media"), home_media.as_deref())
    }

    fn create_with(
        override_dir: Option<&Path>,
        system_media: &Path,
        home_media: Option<&Path>,
    ) -> Result<Self> {
        if let Some(dir) = override_dir {
            std::fs::create_dir_all(dir)?;
            return Ok(Self::with_root(dir));
        }

        if system_media.is_dir() && is_writable(system_media) {
            return Ok(Self::with_root(system_media));
        }

        if let Some(home) = home_media.filter(|p| p.exists()) {
            return Ok(Self::with_root(home));
        }

        let tmp = tempfile::Builder::new().prefix("mediagram-").tempdir()?;
        warn!("Using ephemeral media directory {}", tmp.path().display());
        crate::ui::print_warning(&format!("Using ephemeral tmpdir: {}", tmp.path().display()));
        Ok(Self {
            root: tmp.path().to_path_buf(),
            current: Mutex::new(None),
            ephemeral: Some(tmp),
        })
    }

    /// Use `root` as is. The directory must already exist.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: Mutex::new(None),
            ephemeral: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral.is_some()
    }

    fn state(&self) -> MutexGuard<'_, Option<PathBuf>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The active session directory, if one was created yet.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.state().clone()
    }

    /// The active session directory, creating an anonymous one on first use.
    pub fn current_subdir(&self) -> Result<PathBuf> {
        let mut current = self.state();
        self.ensure_session(&mut current)
    }

    fn ensure_session(&self, current: &mut Option<PathBuf>) -> Result<PathBuf> {
        match current.as_ref() {
            Some(dir) => Ok(dir.clone()),
            None => {
                let dir = self.create_anonymous()?;
                *current = Some(dir.clone());
                Ok(dir)
            }
        }
    }

    /// Start a new anonymous session. The old directory is left on disk.
    pub fn reset_subdir(&self) -> Result<PathBuf> {
        let mut current = self.state();
        let dir = self.create_anonymous()?;
        info!("Started session directory {}", dir.display());
        *current = Some(dir.clone());
        Ok(dir)
    }

    fn create_anonymous(&self) -> Result<PathBuf> {
        let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut counter = 0usize;
        loop {
            let dir = self.root.join(format!(".{timestamp}.{counter}"));
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    debug!("Created session directory {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => counter += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Promote the active session to a permanent directory.
    ///
    /// Without a name the leading dot and counter are dropped; with one the
    /// slug is appended after the timestamp. Fails without touching anything
    /// when the target already exists.
    pub fn rename_subdir(&self, name: Option<&str>) -> Result<PathBuf> {
        let mut current = self.state();
        let dir = current
            .clone()
            .ok_or_else(|| Error::Media("No current subdirectory to rename".to_string()))?;

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timestamp: String = dir_name
            .trim_start_matches('.')
            .chars()
            .take(TIMESTAMP_LEN)
            .collect();

        let slug = name.map(slugify).filter(|s| !s.is_empty());
        let new_name = match slug {
            Some(slug) => format!("{timestamp}-{slug}"),
            None => timestamp,
        };

        let target = self.root.join(&new_name);
        if target == dir {
            return Ok(dir);
        }
        if target.exists() {
            return Err(Error::Media(format!("Directory {new_name} already exists")));
        }

        std::fs::rename(&dir, &target)?;
        info!("Renamed session {} -> {}", dir_name, new_name);
        *current = Some(target.clone());
        Ok(target)
    }

    /// Path of the active transcript file.
    pub fn messages_file(&self) -> Result<PathBuf> {
        Ok(self.current_subdir()?.join(MESSAGES_FILE))
    }

    /// Append one entry to `messages.jsonl`, creating the session on demand.
    pub fn log_message(&self, entry: &TranscriptEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        // The lock stays held so a rename cannot move the file mid-write.
        let mut current = self.state();
        let path = self.ensure_session(&mut current)?.join(MESSAGES_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl TranscriptSink for MediaManager {
    fn record(&self, entry: TranscriptEntry) {
        if let Err(e) = self.log_message(&entry) {
            warn!("Failed to write transcript entry: {}", e);
        }
    }
}

fn is_writable(dir: &Path) -> bool {
    let probe = dir.join("test_write");
    match std::fs::create_dir(&probe) {
        Ok(()) => std::fs::remove_dir(&probe).is_ok(),
        Err(_) => false,
    }
}

/// Lowercase, drop everything but word characters, spaces and hyphens, then
/// collapse runs of spaces and hyphens into one hyphen.
pub fn slugify(text: &str) -> String {
    let kept: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();

    let mut slug = String::with_capacity(kept.len());
    let mut in_separator = false;
    for c in kept.chars() {
        if c == '-' || c.is_whitespace() {
            if !in_separator {
                slug.push('-');
            }
            in_separator = true;
        } else {
            slug.push(c);
            in_separator = false;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(tmp: &TempDir) -> MediaManager {
        MediaManager::with_root(tmp.path())
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Podcast!"), "my-podcast");
        assert_eq!(slugify("  a -- b  c "), "a-b-c");
        assert_eq!(slugify("Café_2024"), "café_2024");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_anonymous_subdir_is_lazy_and_stable() {
        let tmp = TempDir::new().unwrap();
        let media = manager(&tmp);
        assert!(media.session_dir().is_none());

        let first = media.current_subdir().unwrap();
        let second = media.current_subdir().unwrap();
        assert_eq!(first, second);

        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with('.'));
        assert!(name.ends_with(".0"));
        assert_eq!(name.len(), 1 + TIMESTAMP_LEN + 2);
    }

    #[test]
    fn test_reset_creates_new_directory() {
        let tmp = TempDir::new().unwrap();
        let media = manager(&tmp);
        let first = media.current_subdir().unwrap();
        let second = media.reset_subdir().unwrap();

        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
        assert_eq!(media.session_dir(), Some(second));
    }

    #[test]
    fn test_rename_with_and_without_name() {
        let tmp = TempDir::new().unwrap();
        let media = manager(&tmp);
        let anon = media.current_subdir().unwrap();
        let timestamp = anon.file_name().unwrap().to_string_lossy()[1..16].to_string();

        let named = media.rename_subdir(Some("Trip to Rome")).unwrap();
        assert_eq!(
            named.file_name().unwrap().to_string_lossy(),
            format!("{timestamp}-trip-to-rome")
        );
        assert!(!anon.exists());

        media.reset_subdir().unwrap();
        let plain = media.rename_subdir(None).unwrap();
        assert!(!plain.file_name().unwrap().to_string_lossy().starts_with('.'));
        assert_eq!(plain.file_name().unwrap().to_string_lossy().len(), TIMESTAMP_LEN);
    }

    #[test]
    fn test_rename_collision_leaves_session_alone() {
        let tmp = TempDir::new().unwrap();
        let media = manager(&tmp);
        let anon = media.current_subdir().unwrap();
        let timestamp = anon.file_name().unwrap().to_string_lossy()[1..16].to_string();
        std::fs::create_dir(tmp.path().join(format!("{timestamp}-taken"))).unwrap();

        let err = media.rename_subdir(Some("taken")).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(anon.exists());
        assert_eq!(media.session_dir(), Some(anon));
    }

    #[test]
    fn test_rename_without_session_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(manager(&tmp).rename_subdir(Some("x")).is_err());
    }

    #[test]
    fn test_log_message_appends_jsonl() {
        let tmp = TempDir::new().unwrap();
        let media = manager(&tmp);
        media
            .log_message(&TranscriptEntry::new(EntryRole::User, "hello").with("name", "Alice"))
            .unwrap();
        media.record(TranscriptEntry::new(EntryRole::Assistant, "hi"));

        let content = std::fs::read_to_string(media.messages_file().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["role"], "user");
        assert_eq!(lines[0]["name"], "Alice");
        assert_eq!(lines[1]["role"], "assistant");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[test]
    fn test_root_selection_order() {
        let tmp = TempDir::new().unwrap();
        let over = tmp.path().join("override");
        let system = tmp.path().join("system");
        let home = tmp.path().join("home");

        let media = MediaManager::create_with(Some(&over), &system, Some(&home)).unwrap();
        assert_eq!(media.root(), over.as_path());
        assert!(over.is_dir());

        std::fs::create_dir(&home).unwrap();
        let media = MediaManager::create_with(None, &system, Some(&home)).unwrap();
        assert_eq!(media.root(), home.as_path());

        std::fs::create_dir(&system).unwrap();
        let media = MediaManager::create_with(None, &system, Some(&home)).unwrap();
        assert_eq!(media.root(), system.as_path());
        assert!(!system.join("test_write").exists());

        let media =
            MediaManager::create_with(None, &tmp.path().join("missing"), None).unwrap();
        assert!(media.is_ephemeral());
        assert!(media.root().is_dir());
    }
}
