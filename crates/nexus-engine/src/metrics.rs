//! Per-command execution metrics.
//!
//! The engine emits one `(name, latency_us, ok)` sample per command to a
//! dedicated aggregation thread over a queue, so the execute path never
//! takes a stats lock. Snapshots use a reply channel.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;

use tracing::warn;

/// Aggregate counters for one command name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandStats {
    pub count: u64,
    pub failures: u64,
    pub total_latency_us: u64,
}

/// Point-in-time aggregate across all commands.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub commands_executed: u64,
    pub total_execution_time_us: u64,
    pub failures: u64,
    pub per_command: BTreeMap<String, CommandStats>,
}

enum MetricsMsg {
    Sample {
        name: String,
        latency_us: u64,
        ok: bool,
    },
    Snapshot(mpsc::SyncSender<MetricsSnapshot>),
    Reset,
    Shutdown,
}

/// Handle to the metrics aggregation thread.
pub struct MetricsSink {
    tx: mpsc::Sender<MetricsMsg>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MetricsSink {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("metrics".into())
            .spawn(move || aggregate_loop(rx))
            .expect("failed to spawn metrics thread");
        Self {
            tx,
            handle: Some(handle),
        }
    }

    /// Fire-and-forget sample.
    pub fn record(&self, name: &str, latency_us: u64, ok: bool) {
        let _ = self.tx.send(MetricsMsg::Sample {
            name: name.to_string(),
            latency_us,
            ok,
        });
    }

    /// Current totals; returns an empty snapshot if the thread is gone.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        if self.tx.send(MetricsMsg::Snapshot(reply_tx)).is_err() {
            warn!("metrics thread unavailable");
            return MetricsSnapshot::default();
        }
        reply_rx.recv().unwrap_or_default()
    }

    pub fn reset(&self) {
        let _ = self.tx.send(MetricsMsg::Reset);
    }

    pub fn shutdown(mut self) {
        let _ = self.tx.send(MetricsMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsSink {
    fn drop(&mut self) {
        let _ = self.tx.send(MetricsMsg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn aggregate_loop(rx: mpsc::Receiver<MetricsMsg>) {
    let mut snapshot = MetricsSnapshot::default();
    for msg in rx {
        match msg {
            MetricsMsg::Sample {
                name,
                latency_us,
                ok,
            } => {
                snapshot.commands_executed += 1;
                snapshot.total_execution_time_us += latency_us;
                if !ok {
                    snapshot.failures += 1;
                }
                let entry = snapshot.per_command.entry(name).or_default();
                entry.count += 1;
                entry.total_latency_us += latency_us;
                if !ok {
                    entry.failures += 1;
                }
            }
            MetricsMsg::Snapshot(reply) => {
                let _ = reply.send(snapshot.clone());
            }
            MetricsMsg::Reset => snapshot = MetricsSnapshot::default(),
            MetricsMsg::Shutdown => break,
        }
    }
}
