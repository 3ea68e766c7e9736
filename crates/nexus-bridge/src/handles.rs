//! The native-handle table.
//!
//! Handles pin native resources (watchers, monitors, downloaded files,
//! opaque script values) until explicitly released. The table is sharded to
//! keep concurrent pipelines off a single lock; each entry holds a memory
//! reservation that is released together with the resource.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nexus_types::{next_object_id, NexusError, Value};

use crate::memory::MemoryReservation;

const SHARD_COUNT: usize = 16;

/// An event buffered by a watch or monitor resource.
pub type EventBuffer = Arc<Mutex<Vec<Value>>>;

/// What a handle pins.
pub enum NativeResource {
    /// A filesystem watcher: the `notify` watcher is kept alive inside,
    /// buffered events drain through `events`.
    Watch {
        watcher: Box<dyn std::any::Any + Send>,
        events: EventBuffer,
        stopped: Arc<AtomicBool>,
    },
    /// A process monitor sampling on its own thread.
    Monitor {
        stopped: Arc<AtomicBool>,
        samples: EventBuffer,
    },
    /// A file persisted by `net.download`.
    File { path: String },
    /// A scripted value with no native representation, parked here so its
    /// identity survives a round trip.
    Opaque { value: rhai::Dynamic },
}

impl NativeResource {
    /// Short tag used in diagnostics and `describe`.
    pub fn kind(&self) -> &'static str {
        match self {
            NativeResource::Watch { .. } => "watch",
            NativeResource::Monitor { .. } => "monitor",
            NativeResource::File { .. } => "file",
            NativeResource::Opaque { .. } => "opaque",
        }
    }
}

struct Entry {
    resource: NativeResource,
    _reservation: Option<MemoryReservation>,
}

/// Sharded id → resource table.
pub struct HandleTable {
    shards: Vec<Mutex<HashMap<u64, Entry>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, id: u64) -> &Mutex<HashMap<u64, Entry>> {
        &self.shards[(id as usize) % SHARD_COUNT]
    }

    /// Pin a resource, returning its new handle id.
    pub fn pin(&self, resource: NativeResource, reservation: Option<MemoryReservation>) -> u64 {
        let id = next_object_id();
        self.shard(id)
            .lock()
            .expect("handle shard lock poisoned")
            .insert(
                id,
                Entry {
                    resource,
                    _reservation: reservation,
                },
            );
        id
    }

    /// Run `f` against a pinned resource.
    pub fn with<R>(
        &self,
        id: u64,
        f: impl FnOnce(&NativeResource) -> R,
    ) -> Result<R, NexusError> {
        let shard = self.shard(id).lock().expect("handle shard lock poisoned");
        shard
            .get(&id)
            .map(|entry| f(&entry.resource))
            .ok_or_else(|| NexusError::NotFound(format!("handle {id}")))
    }

    /// Release a handle, dropping its resource and memory reservation.
    /// Returns false when the id was not pinned.
    pub fn release(&self, id: u64) -> bool {
        let mut shard = self.shard(id).lock().expect("handle shard lock poisoned");
        match shard.remove(&id) {
            Some(entry) => {
                if let NativeResource::Watch { stopped, .. }
                | NativeResource::Monitor { stopped, .. } = &entry.resource
                {
                    stopped.store(true, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }

    /// True while the id resolves.
    pub fn contains(&self, id: u64) -> bool {
        self.shard(id)
            .lock()
            .expect("handle shard lock poisoned")
            .contains_key(&id)
    }

    /// Total pinned handles across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().expect("handle shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_resolve_release() {
        let table = HandleTable::new();
        let id = table.pin(
            NativeResource::File {
                path: "/tmp/dl".into(),
            },
            None,
        );
        assert!(table.contains(id));
        let kind = table.with(id, |r| r.kind()).unwrap();
        assert_eq!(kind, "file");
        assert!(table.release(id));
        assert!(!table.contains(id));
        assert!(!table.release(id));
    }

    #[test]
    fn unknown_handle_is_not_found() {
        let table = HandleTable::new();
        let err = table.with(999, |_| ()).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::NotFound);
    }

    #[test]
    fn release_flags_watchers_stopped() {
        let table = HandleTable::new();
        let stopped = Arc::new(AtomicBool::new(false));
        let id = table.pin(
            NativeResource::Monitor {
                stopped: Arc::clone(&stopped),
                samples: Arc::new(Mutex::new(Vec::new())),
            },
            None,
        );
        table.release(id);
        assert!(stopped.load(Ordering::Relaxed));
    }
}
