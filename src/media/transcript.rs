//! Append-only conversation transcript (`messages.jsonl`).

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who or what produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    User,
    Assistant,
    Command,
    ToolStart,
    ToolResult,
    Error,
}

/// One line of `messages.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Local>,
    pub role: EntryRole,
    pub content: Value,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl TranscriptEntry {
    pub fn new(role: EntryRole, content: impl Into<Value>) -> Self {
        Self {
            timestamp: Local::now(),
            role,
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// Attach an extra field. `None` values are skipped.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.metadata.insert(key.to_string(), value);
        }
        self
    }
}

/// Destination for transcript entries.
///
/// Recording never fails the caller; sinks log their own write errors.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, entry: TranscriptEntry);
}

/// In-memory transcript for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryTranscript {
    entries: std::sync::Mutex<Vec<TranscriptEntry>>,
}

#[cfg(test)]
impl MemoryTranscript {
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn roles(&self) -> Vec<EntryRole> {
        self.entries().iter().map(|e| e.role).collect()
    }
}

#[cfg(test)]
impl TranscriptSink for MemoryTranscript {
    fn record(&self, entry: TranscriptEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serializes_flat() {
        let entry = TranscriptEntry::new(EntryRole::ToolStart, "listdir")
            .with("tool_id", "tool_listdir_1")
            .with("error", Option::<String>::None);
        let json: Value = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["role"], "tool_start");
        assert_eq!(json["content"], "listdir");
        assert_eq!(json["tool_id"], "tool_listdir_1");
        assert!(json.get("error").is_none());
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
