//! Capability-based permission core for NexusShell.
//!
//! Every boundary-crossing operation (filesystem, process, network, command
//! dispatch) asks this crate's [`CapabilityStore`] whether `action` may be
//! performed on `resource`. Checks are audited to a bounded ring buffer and,
//! optionally, an append-only NDJSON log.

pub mod audit;
pub mod pattern;
pub mod policy;
pub mod store;

pub use audit::{AuditLog, AuditQuery, AuditRecord, AuditWriter};
pub use pattern::pattern_match;
pub use policy::{builtin_policy, policy_by_name, PolicyRule, RuleEffect};
pub use store::{CapabilityStore, Decision, SandboxHandle};
