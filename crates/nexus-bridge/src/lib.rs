//! The object bridge: the only code path exposing native filesystem,
//! process, and network APIs to scripted code.
//!
//! Three responsibilities:
//!
//! 1. **Marshalling** between the native [`Value`] model and the embedded
//!    runtime's values ([`marshal`]).
//! 2. **Native surfaces** (`fs`, `proc`, `net`, `utils`) with fixed method
//!    contracts ([`fs`], [`proc`], [`net`], [`utils`]).
//! 3. **The capability gate**: every surface method issues a permission
//!    check naming its action and resource before doing any work.
//!
//! [`Value`]: nexus_types::Value

pub mod fs;
pub mod handles;
pub mod marshal;
pub mod memory;
pub mod net;
pub mod proc;
pub mod script;
pub mod utils;

use std::sync::Arc;

use nexus_caps::CapabilityStore;

use handles::HandleTable;
use memory::MemoryTracker;

pub use handles::NativeResource;
pub use marshal::HandleRef;
pub use script::ScriptHost;

/// Marshals values and exposes the capability-gated native surfaces.
pub struct ObjectBridge {
    caps: Arc<CapabilityStore>,
    handles: HandleTable,
    memory: Arc<MemoryTracker>,
    http: reqwest::blocking::Client,
}

impl ObjectBridge {
    /// Build a bridge bound to the given capability store and memory cap.
    pub fn new(caps: Arc<CapabilityStore>, max_memory: u64) -> Self {
        Self {
            caps,
            handles: HandleTable::new(),
            memory: MemoryTracker::new(max_memory),
            http: reqwest::blocking::Client::new(),
        }
    }

    pub fn caps(&self) -> &CapabilityStore {
        &self.caps
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    pub(crate) fn http(&self) -> &reqwest::blocking::Client {
        &self.http
    }

    /// Release a pinned handle; true when it existed.
    pub fn release_handle(&self, id: u64) -> bool {
        self.handles.release(id)
    }
}
