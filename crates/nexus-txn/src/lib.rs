//! Transactions over mutable shell state.
//!
//! `begin` snapshots `{cwd, env, aliases}` and pushes a frame. Commands run
//! serially under the frame and may register rollback closures (LIFO). On
//! commit the innermost frame pops and its closures merge into the parent
//! (so an outer rollback still undoes the child's work); on rollback the
//! closures run newest-first, the snapshot is restored, and the frame pops.
//! A child rollback never cascades to its parent. Rollback never throws:
//! closure errors are logged and skipped.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use nexus_types::value::next_object_id;
use nexus_types::{NexusError, ShellState, StateSnapshot, Value};

/// A rollback closure registered by an operation inside a transaction.
pub type RollbackFn = Box<dyn FnOnce() -> Result<(), NexusError> + Send>;

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

struct Frame {
    id: u64,
    parent: Option<u64>,
    snapshot: StateSnapshot,
    rollback: Vec<RollbackFn>,
}

/// Stack of active transactions over one [`ShellState`].
pub struct TransactionManager {
    state: Arc<ShellState>,
    stack: Mutex<Vec<Frame>>,
}

impl TransactionManager {
    pub fn new(state: Arc<ShellState>) -> Self {
        Self {
            state,
            stack: Mutex::new(Vec::new()),
        }
    }

    /// Open a transaction; returns its id. Nested calls push frames.
    pub fn begin(&self) -> u64 {
        let mut stack = self.stack.lock().expect("transaction stack poisoned");
        let id = next_object_id();
        let parent = stack.last().map(|f| f.id);
        stack.push(Frame {
            id,
            parent,
            snapshot: self.state.snapshot(),
            rollback: Vec::new(),
        });
        debug!(id, ?parent, "transaction begun");
        id
    }

    /// Id of the innermost open transaction, if any.
    pub fn current(&self) -> Option<u64> {
        self.stack
            .lock()
            .expect("transaction stack poisoned")
            .last()
            .map(|f| f.id)
    }

    /// Depth of the transaction stack.
    pub fn depth(&self) -> usize {
        self.stack.lock().expect("transaction stack poisoned").len()
    }

    /// Register an undo closure with the innermost transaction.
    pub fn register_rollback(&self, f: RollbackFn) -> Result<(), NexusError> {
        let mut stack = self.stack.lock().expect("transaction stack poisoned");
        match stack.last_mut() {
            Some(frame) => {
                frame.rollback.push(f);
                Ok(())
            }
            None => Err(NexusError::InvalidArgument(
                "no active transaction".to_string(),
            )),
        }
    }

    fn pop_expected(&self, id: u64) -> Result<Frame, NexusError> {
        let mut stack = self.stack.lock().expect("transaction stack poisoned");
        match stack.last().map(|f| f.id) {
            Some(current) if current == id => Ok(stack.pop().expect("frame present")),
            Some(current) => Err(NexusError::InvalidArgument(format!(
                "transaction {id} is not innermost (current is {current})"
            ))),
            None => Err(NexusError::NotFound(format!("transaction {id}"))),
        }
    }

    /// Commit: keep mutated state, discard the snapshot. The child's
    /// rollback closures merge into the parent so an outer rollback stays
    /// correct.
    pub fn commit(&self, id: u64) -> Result<(), NexusError> {
        let frame = self.pop_expected(id)?;
        if frame.parent.is_some() {
            let mut stack = self.stack.lock().expect("transaction stack poisoned");
            if let Some(parent) = stack.last_mut() {
                parent.rollback.extend(frame.rollback);
            }
        }
        debug!(id, "transaction committed");
        Ok(())
    }

    /// Roll back: run undo closures LIFO (errors logged, never re-raised),
    /// restore the snapshot, pop the frame.
    pub fn rollback(&self, id: u64) -> Result<(), NexusError> {
        let mut frame = self.pop_expected(id)?;
        while let Some(undo) = frame.rollback.pop() {
            if let Err(e) = undo() {
                warn!(id, error = %e, "rollback closure failed; continuing");
            }
        }
        self.state.restore(&frame.snapshot);
        debug!(id, "transaction rolled back");
        Ok(())
    }

    /// Run `commands` in one transaction via `runner`. All succeed →
    /// commit and return their values; any failure → rollback, invoke
    /// `on_rollback`, and surface `TransactionAborted`.
    pub fn execute_transaction(
        &self,
        commands: &[String],
        mut runner: impl FnMut(&str) -> Result<Value, NexusError>,
        on_rollback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Vec<Value>, NexusError> {
        let id = self.begin();
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            match runner(command) {
                Ok(value) => results.push(value),
                Err(e) => {
                    // Rollback of the frame we just opened cannot fail the
                    // innermost check.
                    self.rollback(id).expect("innermost frame");
                    if let Some(cb) = on_rollback {
                        cb();
                    }
                    return Err(NexusError::TransactionAborted(format!(
                        "'{command}' failed: {e}"
                    )));
                }
            }
        }
        self.commit(id)?;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state() -> Arc<ShellState> {
        Arc::new(ShellState::new("/home/u", BTreeMap::new()))
    }

    #[test]
    fn rollback_restores_state_bit_identical() {
        let s = state();
        s.set_env_var("KEEP", "original");
        s.set_alias("ll", "ls -l");
        let before = s.snapshot();

        let txn = TransactionManager::new(Arc::clone(&s));
        let id = txn.begin();
        s.set_cwd("/tmp");
        s.set_env_var("KEEP", "mutated");
        s.set_env_var("NEW", "x");
        s.remove_alias("ll");
        txn.rollback(id).unwrap();

        assert_eq!(s.snapshot(), before);
    }

    #[test]
    fn commit_keeps_mutations() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let id = txn.begin();
        s.set_cwd("/tmp");
        txn.commit(id).unwrap();
        assert_eq!(s.cwd(), "/tmp");
        assert_eq!(txn.depth(), 0);
    }

    #[test]
    fn rollback_closures_run_lifo() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let order = Arc::new(Mutex::new(Vec::new()));
        let id = txn.begin();
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            txn.register_rollback(Box::new(move || {
                order.lock().unwrap().push(label);
                Ok(())
            }))
            .unwrap();
        }
        txn.rollback(id).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
    }

    #[test]
    fn rollback_closure_errors_are_skipped() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let ran = Arc::new(AtomicUsize::new(0));
        let id = txn.begin();
        let r = Arc::clone(&ran);
        txn.register_rollback(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        txn.register_rollback(Box::new(|| {
            Err(NexusError::ExecutionFailure("undo failed".into()))
        }))
        .unwrap();
        // Never throws to the caller.
        txn.rollback(id).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn child_rollback_does_not_cascade() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let outer = txn.begin();
        s.set_cwd("/outer");
        let inner = txn.begin();
        s.set_cwd("/inner");
        txn.rollback(inner).unwrap();
        // The child restored to its own begin point.
        assert_eq!(s.cwd(), "/outer");
        txn.commit(outer).unwrap();
        assert_eq!(s.cwd(), "/outer");
    }

    #[test]
    fn child_commit_merges_rollbacks_into_parent() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let undone = Arc::new(AtomicUsize::new(0));

        let outer = txn.begin();
        let inner = txn.begin();
        let u = Arc::clone(&undone);
        txn.register_rollback(Box::new(move || {
            u.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();
        txn.commit(inner).unwrap();

        txn.rollback(outer).unwrap();
        assert_eq!(undone.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_order_commit_is_rejected() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let outer = txn.begin();
        let _inner = txn.begin();
        assert!(txn.commit(outer).is_err());
    }

    #[test]
    fn register_without_transaction_fails() {
        let s = state();
        let txn = TransactionManager::new(s);
        assert!(txn.register_rollback(Box::new(|| Ok(()))).is_err());
    }

    #[test]
    fn execute_transaction_commits_on_success() {
        let s = state();
        let txn = TransactionManager::new(Arc::clone(&s));
        let commands = vec!["a".to_string(), "b".to_string()];
        let results = txn
            .execute_transaction(&commands, |cmd| Ok(Value::string(cmd)), None)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(txn.depth(), 0);
    }

    #[test]
    fn execute_transaction_rolls_back_on_failure() {
        let s = state();
        let before = s.snapshot();
        let txn = TransactionManager::new(Arc::clone(&s));
        let rolled = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&rolled);

        let commands = vec!["ok".to_string(), "boom".to_string(), "never".to_string()];
        let mut seen = Vec::new();
        let err = txn
            .execute_transaction(
                &commands,
                |cmd| {
                    seen.push(cmd.to_string());
                    if cmd == "boom" {
                        s.set_cwd("/poisoned");
                        Err(NexusError::ExecutionFailure("kaboom".into()))
                    } else {
                        Ok(Value::null())
                    }
                },
                Some(Box::new(move || {
                    r.fetch_add(1, Ordering::SeqCst);
                })),
            )
            .unwrap_err();

        assert_eq!(err.kind(), nexus_types::ErrorKind::TransactionAborted);
        assert_eq!(seen, vec!["ok", "boom"]);
        assert_eq!(rolled.load(Ordering::SeqCst), 1);
        assert_eq!(s.snapshot(), before);
        assert_eq!(txn.depth(), 0);
    }
}
