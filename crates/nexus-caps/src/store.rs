//! The capability store: grants, capabilities, sandboxes, and the check
//! algorithm every boundary-crossing operation funnels through.
//!
//! Lookup order for `check(action, resource)`:
//!
//! 1. Compose the key `action:resource`.
//! 2. Inside a sandbox, only the sandbox's allow-list is consulted.
//! 3. Exact key in the grant map wins.
//! 4. Otherwise the first wildcard entry (insertion order) that matches wins.
//! 5. Default: deny.
//!
//! Named capabilities are a separate registry answering presence queries
//! (`has_capability`); they never participate in `check`.
//!
//! Every check appends exactly one audit record.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use tracing::debug;

use nexus_types::{Capability, CapabilityGate, NexusError, PolicyName};

use crate::audit::{AuditLog, AuditQuery, AuditRecord, AuditWriter};
use crate::pattern::{is_wildcard, pattern_match};
use crate::policy::{builtin_policy, RuleEffect};

/// Grant map values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
struct GrantEntry {
    key: String,
    decision: Decision,
    wildcard: bool,
}

/// Identifies a created sandbox; pass it back to [`CapabilityStore::enter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
}

#[derive(Default)]
struct StoreInner {
    /// Grant entries in insertion order; `exact` indexes the non-pattern keys.
    grants: Vec<GrantEntry>,
    exact: HashMap<String, usize>,
    capabilities: HashMap<String, Capability>,
    sandboxes: HashMap<String, Vec<String>>,
    /// Stack of entered sandbox ids; the innermost governs checks.
    active: Vec<String>,
}

/// Process-wide permission state. Reads take the reader lock; the audit
/// trail has its own queue so checks stay cheap.
pub struct CapabilityStore {
    inner: RwLock<StoreInner>,
    audit: AuditLog,
}

impl CapabilityStore {
    /// An empty store (default-deny) with the given audit configuration.
    pub fn new(audit_capacity: usize, writer: Option<AuditWriter>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            audit: AuditLog::new(audit_capacity, writer),
        }
    }

    /// Compose the query/grant key from an action and optional resource.
    fn compose_key(action: &str, resource: &str) -> String {
        if resource.is_empty() {
            action.to_string()
        } else {
            format!("{action}:{resource}")
        }
    }

    /// Record `pattern` (optionally scoped to `resource`) as allowed.
    /// Granting an already-granted pattern is a no-op.
    pub fn grant(&self, pattern: &str, resource: Option<&str>) {
        self.upsert(
            Self::compose_key(pattern, resource.unwrap_or("")),
            Decision::Allow,
        );
    }

    /// Record an explicit deny for `pattern`, whether or not it was granted.
    pub fn revoke(&self, pattern: &str, resource: Option<&str>) {
        self.upsert(
            Self::compose_key(pattern, resource.unwrap_or("")),
            Decision::Deny,
        );
    }

    fn upsert(&self, key: String, decision: Decision) {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        let existing = inner.exact.get(&key).copied();
        if let Some(idx) = existing {
            inner.grants[idx].decision = decision;
            return;
        }
        if let Some(entry) = inner.grants.iter_mut().find(|e| e.key == key) {
            entry.decision = decision;
            return;
        }
        let wildcard = is_wildcard(&key);
        inner.grants.push(GrantEntry {
            key: key.clone(),
            decision,
            wildcard,
        });
        if !wildcard {
            let idx = inner.grants.len() - 1;
            inner.exact.insert(key, idx);
        }
    }

    /// The permission check. Appends exactly one audit record.
    pub fn check(&self, action: &str, resource: &str) -> bool {
        let key = Self::compose_key(action, resource);
        let inner = self.inner.read().expect("capability store lock poisoned");

        let sandbox = inner.active.last().cloned();
        let granted = match &sandbox {
            Some(id) => {
                let allowed = inner
                    .sandboxes
                    .get(id)
                    .map(|patterns| patterns.iter().any(|p| pattern_match(&key, p)))
                    .unwrap_or(false);
                allowed
            }
            None => Self::lookup(&inner, &key),
        };
        drop(inner);

        if !granted {
            debug!(action, resource, "permission denied");
        }
        self.audit.append(AuditRecord {
            ts: Utc::now(),
            action: action.to_string(),
            resource: resource.to_string(),
            granted,
            sandbox,
        });
        granted
    }

    fn lookup(inner: &StoreInner, key: &str) -> bool {
        if let Some(&idx) = inner.exact.get(key) {
            return inner.grants[idx].decision == Decision::Allow;
        }
        for entry in inner.grants.iter().filter(|e| e.wildcard) {
            if pattern_match(key, &entry.key) {
                return entry.decision == Decision::Allow;
            }
        }
        false
    }

    /// Check and convert a denial into the canonical error.
    pub fn require(&self, action: &str, resource: &str) -> Result<(), NexusError> {
        if self.check(action, resource) {
            Ok(())
        } else {
            Err(NexusError::denied(action, resource))
        }
    }

    /// Register a named capability. Capabilities are inspected with
    /// [`has_capability`](Self::has_capability); grants for `check` go
    /// through [`grant`](Self::grant).
    pub fn add_capability(&self, capability: Capability) {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        inner
            .capabilities
            .insert(capability.name.clone(), capability);
    }

    pub fn remove_capability(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        inner.capabilities.remove(name).is_some()
    }

    /// Is a capability of this name present and unexpired?
    pub fn has_capability(&self, name: &str) -> bool {
        let inner = self.inner.read().expect("capability store lock poisoned");
        inner
            .capabilities
            .get(name)
            .is_some_and(|cap| !cap.is_expired(Utc::now()))
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let inner = self.inner.read().expect("capability store lock poisoned");
        inner.capabilities.values().cloned().collect()
    }

    /// Fold a built-in policy's rules into the grant map, in order.
    pub fn apply_policy(&self, name: PolicyName) {
        for rule in builtin_policy(name) {
            match rule.effect {
                RuleEffect::Allow => self.grant(&rule.pattern, None),
                RuleEffect::Deny => self.revoke(&rule.pattern, None),
            }
        }
        tracing::info!(policy = name.as_str(), "applied security policy");
    }

    /// Register a sandbox with an explicit allow-list.
    pub fn create_sandbox(&self, id: &str, allowed: Vec<String>) -> SandboxHandle {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        inner.sandboxes.insert(id.to_string(), allowed);
        SandboxHandle { id: id.to_string() }
    }

    /// Enter a previously created sandbox. Checks from here on consult only
    /// its allow-list, until [`exit`](Self::exit).
    pub fn enter(&self, id: &str) -> Result<(), NexusError> {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        if !inner.sandboxes.contains_key(id) {
            return Err(NexusError::NotFound(format!("sandbox '{id}'")));
        }
        inner.active.push(id.to_string());
        Ok(())
    }

    /// Leave the innermost sandbox. Returns false when none is active.
    pub fn exit(&self) -> bool {
        let mut inner = self.inner.write().expect("capability store lock poisoned");
        inner.active.pop().is_some()
    }

    /// The innermost active sandbox id, if any.
    pub fn current_sandbox(&self) -> Option<String> {
        let inner = self.inner.read().expect("capability store lock poisoned");
        inner.active.last().cloned()
    }

    /// Filter the in-memory audit ring.
    pub fn audit_query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        self.audit.query(query)
    }

    /// Number of audit records retained in the ring.
    pub fn audit_len(&self) -> usize {
        self.audit.len()
    }

    /// Drop the in-memory audit records; the NDJSON file keeps history.
    pub fn audit_clear(&self) {
        self.audit.clear();
    }
}

impl CapabilityGate for CapabilityStore {
    fn check(&self, action: &str, resource: &str) -> bool {
        CapabilityStore::check(self, action, resource)
    }
}
