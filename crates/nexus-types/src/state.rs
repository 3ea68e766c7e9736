//! Mutable shell state: `cwd`, `env`, and the alias table.
//!
//! There are no global mutable variables in the shell; all of this lives in
//! one [`ShellState`] owned by the kernel. Writes go through the single
//! writer lock; reads take a consistent [`StateSnapshot`] at command start
//! so concurrent mutation never tears observations mid-command.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A consistent point-in-time copy of the mutable shell state. Also the
/// unit of capture/restore for transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug)]
struct StateInner {
    cwd: String,
    env: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
}

/// Process-wide shell state behind a single writer lock.
#[derive(Debug)]
pub struct ShellState {
    inner: RwLock<StateInner>,
}

impl ShellState {
    /// Start from the host process environment and current directory.
    pub fn from_host() -> Self {
        let cwd = std::env::current_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());
        let env = std::env::vars().collect();
        Self::new(cwd, env)
    }

    pub fn new(cwd: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                cwd: cwd.into(),
                env,
                aliases: BTreeMap::new(),
            }),
        }
    }

    /// Take a consistent snapshot of all three pieces at once.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().expect("shell state lock poisoned");
        StateSnapshot {
            cwd: inner.cwd.clone(),
            env: inner.env.clone(),
            aliases: inner.aliases.clone(),
        }
    }

    /// Restore all three pieces from a snapshot in one write.
    pub fn restore(&self, snapshot: &StateSnapshot) {
        let mut inner = self.inner.write().expect("shell state lock poisoned");
        inner.cwd = snapshot.cwd.clone();
        inner.env = snapshot.env.clone();
        inner.aliases = snapshot.aliases.clone();
    }

    pub fn cwd(&self) -> String {
        self.inner.read().expect("shell state lock poisoned").cwd.clone()
    }

    pub fn set_cwd(&self, cwd: impl Into<String>) {
        self.inner.write().expect("shell state lock poisoned").cwd = cwd.into();
    }

    pub fn env_var(&self, key: &str) -> Option<String> {
        self.inner
            .read()
            .expect("shell state lock poisoned")
            .env
            .get(key)
            .cloned()
    }

    pub fn set_env_var(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .write()
            .expect("shell state lock poisoned")
            .env
            .insert(key.into(), value.into());
    }

    pub fn unset_env_var(&self, key: &str) {
        self.inner
            .write()
            .expect("shell state lock poisoned")
            .env
            .remove(key);
    }

    pub fn alias(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .expect("shell state lock poisoned")
            .aliases
            .get(name)
            .cloned()
    }

    pub fn set_alias(&self, name: impl Into<String>, target: impl Into<String>) {
        self.inner
            .write()
            .expect("shell state lock poisoned")
            .aliases
            .insert(name.into(), target.into());
    }

    pub fn remove_alias(&self, name: &str) -> bool {
        self.inner
            .write()
            .expect("shell state lock poisoned")
            .aliases
            .remove(name)
            .is_some()
    }

    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.inner
            .read()
            .expect("shell state lock poisoned")
            .aliases
            .clone()
    }
}
