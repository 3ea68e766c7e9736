//! Execution recording and time-travel replay.
//!
//! A recording is an append-only stream of `(input, context, result)`
//! tuples plus optional system snapshots. Frozen recordings persist as
//! JSON under `<cwd>/.nexus/recordings/<name>.json` and replay in order
//! through any runner, with breakpoints, speed control, and divergence
//! reporting.

mod format;
mod replay;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info};

use nexus_types::value::next_object_id;
use nexus_types::{CommandContext, NexusError, Value};

pub use format::{CommandEntry, Metadata, RecordingFile, SnapshotEntry};
pub use replay::{replay, Divergence, ReplayOptions, ReplayReport};

struct ActiveRecording {
    id: u64,
    name: String,
    started_ms: i64,
    entries: Vec<CommandEntry>,
    snapshots: Vec<SnapshotEntry>,
    next_seq: u64,
}

/// Captures command streams; at most one recording is active at a time.
pub struct Recorder {
    active: Mutex<Option<ActiveRecording>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().expect("recorder lock poisoned").is_some()
    }

    /// Begin a recording. Fails if one is already active.
    pub fn start(&self, name: Option<&str>) -> Result<u64, NexusError> {
        let mut active = self.active.lock().expect("recorder lock poisoned");
        if active.is_some() {
            return Err(NexusError::InvalidArgument(
                "a recording is already active".to_string(),
            ));
        }
        let id = next_object_id();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("recording-{id}"));
        info!(id, name, "recording started");
        *active = Some(ActiveRecording {
            id,
            name,
            started_ms: Utc::now().timestamp_millis(),
            entries: Vec::new(),
            snapshots: Vec::new(),
            next_seq: 0,
        });
        Ok(id)
    }

    /// Freeze and return the active recording.
    pub fn stop(&self) -> Result<RecordingFile, NexusError> {
        let mut active = self.active.lock().expect("recorder lock poisoned");
        let recording = active
            .take()
            .ok_or_else(|| NexusError::InvalidArgument("no active recording".to_string()))?;
        let ended_ms = Utc::now().timestamp_millis();
        info!(id = recording.id, entries = recording.entries.len(), "recording stopped");
        Ok(RecordingFile {
            id: recording.id,
            name: recording.name,
            start_time: recording.started_ms,
            end_time: ended_ms,
            duration: ended_ms - recording.started_ms,
            metadata: Metadata::current(),
            commands: recording.entries,
            snapshots: recording.snapshots,
        })
    }

    /// Append a command entry; returns its sequence id, or `None` when no
    /// recording is active or the context is a replay. Best-effort: never
    /// fails the caller.
    pub fn record_command(&self, input: &str, ctx: &CommandContext) -> Option<u64> {
        if ctx.in_replay {
            return None;
        }
        let mut active = self.active.lock().expect("recorder lock poisoned");
        let recording = active.as_mut()?;
        let seq = recording.next_seq;
        recording.next_seq += 1;
        let context = serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null);
        recording.entries.push(CommandEntry {
            id: seq,
            timestamp: Utc::now().timestamp_millis(),
            input: input.to_string(),
            context,
            result: None,
            error: None,
            execution_time: 0,
        });
        Some(seq)
    }

    /// Attach the outcome to a previously recorded command.
    pub fn record_result(
        &self,
        seq: u64,
        result: &Result<Value, NexusError>,
        latency_us: u64,
    ) {
        let mut active = self.active.lock().expect("recorder lock poisoned");
        let Some(recording) = active.as_mut() else {
            return;
        };
        let Some(entry) = recording.entries.iter_mut().find(|e| e.id == seq) else {
            debug!(seq, "record_result for unknown entry");
            return;
        };
        entry.execution_time = latency_us;
        match result {
            Ok(value) => entry.result = Some(value.to_json()),
            Err(e) => entry.error = Some(e.user_line()),
        }
    }

    /// Capture a labelled snapshot into the active recording.
    pub fn create_snapshot(
        &self,
        snapshot_type: &str,
        description: Option<&str>,
        system_state: serde_json::Value,
        shell_state: serde_json::Value,
    ) -> Result<u64, NexusError> {
        let mut active = self.active.lock().expect("recorder lock poisoned");
        let recording = active
            .as_mut()
            .ok_or_else(|| NexusError::InvalidArgument("no active recording".to_string()))?;
        let id = next_object_id();
        recording.snapshots.push(SnapshotEntry {
            id,
            timestamp: Utc::now().timestamp_millis(),
            snapshot_type: snapshot_type.to_string(),
            description: description.unwrap_or_default().to_string(),
            system_state,
            shell_state,
        });
        Ok(id)
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a recording lands: `<base>/.nexus/recordings/<name>.json`.
pub fn recording_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir
        .join(".nexus")
        .join("recordings")
        .join(format!("{name}.json"))
}

/// Persist a frozen recording under `base_dir`. UTF-8, 2-space indent.
pub fn save(recording: &RecordingFile, base_dir: &Path) -> Result<PathBuf, NexusError> {
    let path = recording_path(base_dir, &recording.name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(recording)?;
    std::fs::write(&path, json)?;
    info!(path = %path.display(), "recording saved");
    Ok(path)
}

/// Load a recording from disk. Unknown keys are ignored.
pub fn load(path: &Path) -> Result<RecordingFile, NexusError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| NexusError::NotFound(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| NexusError::InvalidArgument(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_two(recorder: &Recorder) {
        let ctx = CommandContext::default();
        let seq = recorder.record_command("pwd", &ctx).unwrap();
        recorder.record_result(seq, &Ok(Value::string("/tmp")), 120);
        let seq = recorder.record_command("date", &ctx).unwrap();
        recorder.record_result(seq, &Ok(Value::string("2024-01-01")), 80);
    }

    #[test]
    fn start_stop_produces_entries() {
        let recorder = Recorder::new();
        recorder.start(Some("r1")).unwrap();
        assert!(recorder.is_recording());
        record_two(&recorder);
        let recording = recorder.stop().unwrap();
        assert_eq!(recording.name, "r1");
        assert_eq!(recording.commands.len(), 2);
        assert!(recording.commands.iter().all(|c| c.result.is_some()));
        assert!(recording.duration >= 0);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn double_start_is_rejected() {
        let recorder = Recorder::new();
        recorder.start(None).unwrap();
        assert!(recorder.start(None).is_err());
    }

    #[test]
    fn record_without_active_recording_is_none() {
        let recorder = Recorder::new();
        assert!(recorder
            .record_command("pwd", &CommandContext::default())
            .is_none());
    }

    #[test]
    fn replayed_commands_are_not_re_recorded() {
        let recorder = Recorder::new();
        recorder.start(None).unwrap();
        let mut ctx = CommandContext::default();
        ctx.in_replay = true;
        assert!(recorder.record_command("pwd", &ctx).is_none());
        assert_eq!(recorder.stop().unwrap().commands.len(), 0);
    }

    #[test]
    fn errors_are_attached_to_entries() {
        let recorder = Recorder::new();
        recorder.start(None).unwrap();
        let seq = recorder
            .record_command("rm /", &CommandContext::default())
            .unwrap();
        recorder.record_result(
            seq,
            &Err(NexusError::denied("fs:write", "/")),
            50,
        );
        let recording = recorder.stop().unwrap();
        let entry = &recording.commands[0];
        assert!(entry.result.is_none());
        assert!(entry.error.as_deref().unwrap().starts_with("PermissionDenied"));
    }

    #[test]
    fn save_load_round_trip() {
        let recorder = Recorder::new();
        recorder.start(Some("persisted")).unwrap();
        record_two(&recorder);
        recorder
            .create_snapshot(
                "manual",
                Some("before stop"),
                serde_json::json!({"memory": 1}),
                serde_json::json!({"cwd": "/tmp"}),
            )
            .unwrap();
        let recording = recorder.stop().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = save(&recording, dir.path()).unwrap();
        assert!(path.ends_with(".nexus/recordings/persisted.json"));

        let text = std::fs::read_to_string(&path).unwrap();
        // 2-space indented JSON with the wire keys.
        assert!(text.contains("  \"startTime\""));
        assert!(text.contains("\"executionTime\""));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.name, "persisted");
        assert_eq!(loaded.commands.len(), 2);
        assert_eq!(loaded.snapshots.len(), 1);
        assert_eq!(loaded.snapshots[0].snapshot_type, "manual");
    }

    #[test]
    fn loader_accepts_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(
            &path,
            r#"{
              "id": 1, "name": "r", "startTime": 0, "endTime": 10, "duration": 10,
              "futureTopLevel": {"x": 1},
              "metadata": {"shell": "nexus", "version": "9.9", "platform": "plan9"},
              "commands": [{"id": 0, "timestamp": 1, "input": "pwd",
                            "context": {}, "result": "/", "executionTime": 5,
                            "futureEntryKey": true}],
              "snapshots": []
            }"#,
        )
        .unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.commands.len(), 1);
        assert_eq!(loaded.commands[0].input, "pwd");
    }
}
