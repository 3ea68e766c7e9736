//! The on-disk recording format.
//!
//! Field names match the wire format exactly (camelCase); consumers must
//! accept unknown keys, so nothing here denies them.

use serde::{Deserialize, Serialize};

/// Environment metadata stamped into every recording.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub shell: String,
    pub version: String,
    pub platform: String,
}

impl Metadata {
    pub fn current() -> Self {
        Self {
            shell: "nexus".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// One recorded command: input, context snapshot, outcome, latency.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandEntry {
    pub id: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub input: String,
    pub context: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Microseconds.
    pub execution_time: u64,
}

/// A labelled point-in-time capture of system and shell state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotEntry {
    pub id: u64,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub snapshot_type: String,
    pub description: String,
    pub system_state: serde_json::Value,
    pub shell_state: serde_json::Value,
}

/// A frozen recording as persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingFile {
    pub id: u64,
    pub name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub metadata: Metadata,
    pub commands: Vec<CommandEntry>,
    pub snapshots: Vec<SnapshotEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_keys_are_camel_case() {
        let entry = CommandEntry {
            id: 1,
            timestamp: 42,
            input: "pwd".into(),
            context: serde_json::json!({}),
            result: Some(serde_json::json!("/")),
            error: None,
            execution_time: 7,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("executionTime").is_some());
        assert!(json.get("execution_time").is_none());
        // Absent error is omitted entirely.
        assert!(json.get("error").is_none());
    }

    #[test]
    fn snapshot_type_key_is_type() {
        let snap = SnapshotEntry {
            snapshot_type: "auto".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json.get("type").and_then(|v| v.as_str()), Some("auto"));
    }
}
