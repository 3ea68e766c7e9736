//! Per-invocation command context.
//!
//! A [`CommandContext`] is created for each command invocation from a
//! consistent snapshot of the shell state, and is immutable afterwards
//! except for `pipeline_input`, which the engine rewires between stages.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::plan::FlagValue;
use crate::value::Value;

/// The permission question every boundary-crossing operation must ask.
///
/// Implemented by the capability store; injected here as a trait so the
/// context can travel through crates that know nothing about the store.
pub trait CapabilityGate: Send + Sync {
    /// May `action` be performed on `resource`?
    fn check(&self, action: &str, resource: &str) -> bool;
}

/// Gate that allows everything. Default for bare contexts in tests; the
/// engine always installs the real store.
#[derive(Debug, Default)]
pub struct AllowAllGate;

impl CapabilityGate for AllowAllGate {
    fn check(&self, _action: &str, _resource: &str) -> bool {
        true
    }
}

/// Gate that denies everything.
#[derive(Debug, Default)]
pub struct DenyAllGate;

impl CapabilityGate for DenyAllGate {
    fn check(&self, _action: &str, _resource: &str) -> bool {
        false
    }
}

/// Context handed to built-ins, the bridge, and the scripted evaluator.
#[derive(Clone, Serialize, Deserialize)]
pub struct CommandContext {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, FlagValue>,
    /// Output of the previous pipeline stage, if any.
    pub pipeline_input: Option<Value>,
    /// Zero-based position of this command in its pipeline.
    pub pipeline_index: usize,
    /// Total number of stages in the pipeline (1 for a lone command).
    pub pipeline_length: usize,
    /// Capture child stdio into the result value instead of streaming.
    pub capture_stdio: bool,
    /// Set during recorder replay; built-ins and bridge methods may consult
    /// it for deterministic behaviour.
    pub in_replay: bool,
    /// The capability store consulted on boundary-crossing operations.
    #[serde(skip, default = "default_gate")]
    pub caps: Arc<dyn CapabilityGate>,
    /// Cooperative cancellation; bridge methods observe it at I/O
    /// boundaries.
    #[serde(skip)]
    pub cancel: Option<crate::cancel::CancelToken>,
}

fn default_gate() -> Arc<dyn CapabilityGate> {
    Arc::new(AllowAllGate)
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("cwd", &self.cwd)
            .field("args", &self.args)
            .field("pipeline_index", &self.pipeline_index)
            .field("pipeline_length", &self.pipeline_length)
            .field("capture_stdio", &self.capture_stdio)
            .field("in_replay", &self.in_replay)
            .finish()
    }
}

impl Default for CommandContext {
    fn default() -> Self {
        Self {
            cwd: ".".to_string(),
            env: BTreeMap::new(),
            args: Vec::new(),
            flags: BTreeMap::new(),
            pipeline_input: None,
            pipeline_index: 0,
            pipeline_length: 1,
            capture_stdio: true,
            in_replay: false,
            caps: default_gate(),
            cancel: None,
        }
    }
}

impl CommandContext {
    /// A context rooted at `cwd` with the given gate installed.
    pub fn with_gate(cwd: impl Into<String>, caps: Arc<dyn CapabilityGate>) -> Self {
        Self {
            cwd: cwd.into(),
            caps,
            ..Self::default()
        }
    }

    /// Clone this context for the next pipeline stage, feeding it the
    /// previous stage's result.
    pub fn for_stage(&self, index: usize, input: Option<Value>) -> Self {
        let mut next = self.clone();
        next.pipeline_index = index;
        next.pipeline_input = input;
        next
    }

    /// Ask the installed gate; callers use this instead of reaching for the
    /// store directly.
    pub fn check(&self, action: &str, resource: &str) -> bool {
        self.caps.check(action, resource)
    }

    /// Observe the cancellation token, if one is installed.
    pub fn observe_cancel(&self) -> crate::Result<()> {
        match &self.cancel {
            Some(token) => token.observe(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_allows() {
        let ctx = CommandContext::default();
        assert!(ctx.check("fs:read", "/tmp/x"));
    }

    #[test]
    fn deny_gate_denies() {
        let ctx = CommandContext::with_gate("/", Arc::new(DenyAllGate));
        assert!(!ctx.check("fs:read", "/tmp/x"));
    }

    #[test]
    fn stage_context_carries_input() {
        let ctx = CommandContext::default();
        let staged = ctx.for_stage(2, Some(Value::string("prev")));
        assert_eq!(staged.pipeline_index, 2);
        assert_eq!(
            staged.pipeline_input.as_ref().and_then(|v| v.as_str()),
            Some("prev")
        );
    }

    #[test]
    fn serde_skips_gate() {
        let ctx = CommandContext::with_gate("/home/u", Arc::new(DenyAllGate));
        let json = serde_json::to_string(&ctx).unwrap();
        let back: CommandContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cwd, "/home/u");
        // The gate does not survive the round trip; a permissive default is installed.
        assert!(back.check("fs:read", "/"));
    }
}
