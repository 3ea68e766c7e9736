//! Live-payload memory accounting.
//!
//! The bridge enforces a configurable cap on the sum of live value payload
//! sizes it has materialised. Headroom is checked when values cross the
//! bridge; pinned handles hold a reservation until released. The embedded
//! runtime's own heap is not tracked here (it has its own limits).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nexus_types::NexusError;

/// Shared accounting state for bridge-visible payload bytes.
#[derive(Debug)]
pub struct MemoryTracker {
    used: AtomicU64,
    cap: u64,
}

impl MemoryTracker {
    pub fn new(cap: u64) -> Arc<Self> {
        Arc::new(Self {
            used: AtomicU64::new(0),
            cap,
        })
    }

    pub fn cap(&self) -> u64 {
        self.cap
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Would materialising `extra` bytes stay under the cap? Fails without
    /// charging.
    pub fn check_headroom(&self, extra: u64) -> Result<(), NexusError> {
        let used = self.used();
        if used.saturating_add(extra) > self.cap {
            return Err(NexusError::MemoryExceeded(format!(
                "{extra} bytes requested, {used} of {} in use",
                self.cap
            )));
        }
        Ok(())
    }

    /// Charge `bytes` until the returned reservation drops.
    pub fn pin(self: &Arc<Self>, bytes: u64) -> Result<MemoryReservation, NexusError> {
        self.check_headroom(bytes)?;
        self.used.fetch_add(bytes, Ordering::Relaxed);
        Ok(MemoryReservation {
            tracker: Arc::clone(self),
            bytes,
        })
    }
}

/// RAII charge against a [`MemoryTracker`]; releases on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    tracker: Arc<MemoryTracker>,
    bytes: u64,
}

impl MemoryReservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        self.tracker.used.fetch_sub(self.bytes, Ordering::Relaxed);
    }
}
