//! Audit trail for permission checks.
//!
//! Every check appends one [`AuditRecord`] to a bounded in-memory ring
//! buffer (oldest dropped first) and, when a log file is configured, sends
//! it to a dedicated writer thread that appends NDJSON lines. The writer is
//! fire-and-forget: a slow disk never blocks a permission check.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One record per permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub resource: String,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

/// Filter over the in-memory ring buffer.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    /// Substring match on the action.
    pub action_contains: Option<String>,
    /// Substring match on the resource.
    pub resource_contains: Option<String>,
    /// Only records with this outcome.
    pub granted: Option<bool>,
    /// Cap the number of returned records (most recent last).
    pub limit: Option<usize>,
}

enum WriterMsg {
    Append(AuditRecord),
    Shutdown,
}

/// Handle to the dedicated NDJSON writer thread.
///
/// The thread owns the open file exclusively, so no lock sits on the append
/// path. Records are serialized one per line and flushed immediately.
pub struct AuditWriter {
    tx: mpsc::SyncSender<WriterMsg>,
    handle: Option<thread::JoinHandle<()>>,
    path: PathBuf,
}

impl AuditWriter {
    /// Spawn the writer thread appending to `path`. Parent directories are
    /// created if missing.
    pub fn spawn(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, rx) = mpsc::sync_channel::<WriterMsg>(4096);
        let handle = thread::Builder::new()
            .name("audit-writer".into())
            .spawn(move || writer_loop(file, rx))
            .expect("failed to spawn audit writer thread");
        Ok(Self {
            tx,
            handle: Some(handle),
            path,
        })
    }

    /// Queue a record. Fire-and-forget: when the queue is full the record
    /// is dropped with a warning rather than blocking the check path.
    pub fn append(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(WriterMsg::Append(record)) {
            warn!(error = %e, "audit writer queue full, dropping record");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the thread after draining queued records.
    pub fn shutdown(mut self) {
        let _ = self.tx.send(WriterMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AuditWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriterMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(file: std::fs::File, rx: mpsc::Receiver<WriterMsg>) {
    let mut writer = BufWriter::new(file);
    for msg in rx {
        match msg {
            WriterMsg::Append(record) => {
                if let Err(e) = serde_json::to_writer(&mut writer, &record)
                    .map_err(std::io::Error::other)
                    .and_then(|()| writer.write_all(b"\n"))
                    .and_then(|()| writer.flush())
                {
                    warn!(error = %e, "audit append failed");
                }
            }
            WriterMsg::Shutdown => break,
        }
    }
}

/// Bounded ring of recent audit records plus the optional NDJSON sink.
pub struct AuditLog {
    ring: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
    writer: Option<AuditWriter>,
}

impl AuditLog {
    pub fn new(capacity: usize, writer: Option<AuditWriter>) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            writer,
        }
    }

    /// Append a record; the oldest entry is dropped once the ring is full.
    pub fn append(&self, record: AuditRecord) {
        if let Some(writer) = &self.writer {
            writer.append(record.clone());
        }
        let mut ring = self.ring.lock().expect("audit ring lock poisoned");
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(record);
    }

    /// Number of records currently retained.
    pub fn len(&self) -> usize {
        self.ring.lock().expect("audit ring lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a filter over the ring, oldest first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let ring = self.ring.lock().expect("audit ring lock poisoned");
        let mut out: Vec<AuditRecord> = ring
            .iter()
            .filter(|r| {
                query
                    .action_contains
                    .as_deref()
                    .map_or(true, |needle| r.action.contains(needle))
                    && query
                        .resource_contains
                        .as_deref()
                        .map_or(true, |needle| r.resource.contains(needle))
                    && query.granted.map_or(true, |g| r.granted == g)
            })
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let excess = out.len().saturating_sub(limit);
            out.drain(..excess);
        }
        out
    }

    /// Drop all retained records (the NDJSON file is untouched).
    pub fn clear(&self) {
        self.ring.lock().expect("audit ring lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(action: &str, granted: bool) -> AuditRecord {
        AuditRecord {
            ts: Utc::now(),
            action: action.to_string(),
            resource: "/tmp/x".to_string(),
            granted,
            sandbox: None,
        }
    }

    #[test]
    fn ring_drops_oldest_first() {
        let log = AuditLog::new(3, None);
        for i in 0..5 {
            log.append(record(&format!("a{i}"), true));
        }
        let out = log.query(&AuditQuery::default());
        let actions: Vec<_> = out.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, vec!["a2", "a3", "a4"]);
    }

    #[test]
    fn query_filters_and_limits() {
        let log = AuditLog::new(10, None);
        log.append(record("fs:read", true));
        log.append(record("fs:write", false));
        log.append(record("proc:kill", false));

        let denied = log.query(&AuditQuery {
            granted: Some(false),
            ..Default::default()
        });
        assert_eq!(denied.len(), 2);

        let fs_only = log.query(&AuditQuery {
            action_contains: Some("fs:".into()),
            ..Default::default()
        });
        assert_eq!(fs_only.len(), 2);

        let last_one = log.query(&AuditQuery {
            limit: Some(1),
            ..Default::default()
        });
        assert_eq!(last_one[0].action, "proc:kill");
    }

    #[test]
    fn writer_produces_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let writer = AuditWriter::spawn(&path).unwrap();
        writer.append(record("fs:read", true));
        writer.append(record("proc:kill", false));
        writer.shutdown();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, "fs:read");
        assert!(first.granted);
    }
}
