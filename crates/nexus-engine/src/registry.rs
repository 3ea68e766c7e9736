//! Built-in command registry.
//!
//! Handlers are stored as `Arc<dyn CommandHandler>` behind a read/write
//! lock so registration and lookup work from any thread without holding
//! the lock during execution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use nexus_types::{CommandContext, NexusError, Value};

/// Contract for a registered built-in: take a context, return a value.
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    fn execute(&self, ctx: &CommandContext) -> Result<Value, NexusError>;
}

/// A handler built from a closure, for compact registrations.
pub struct FnCommand<F> {
    name: String,
    description: String,
    f: F,
}

impl<F> FnCommand<F>
where
    F: Fn(&CommandContext) -> Result<Value, NexusError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            f,
        }
    }
}

impl<F> CommandHandler for FnCommand<F>
where
    F: Fn(&CommandContext) -> Result<Value, NexusError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn execute(&self, ctx: &CommandContext) -> Result<Value, NexusError> {
        (self.f)(ctx)
    }
}

fn validate_name(name: &str) -> Result<(), NexusError> {
    if name.is_empty() || name.len() > 64 {
        return Err(NexusError::InvalidArgument(
            "command name must be 1-64 characters".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(NexusError::InvalidArgument(format!(
            "invalid command name '{name}'"
        )));
    }
    Ok(())
}

/// Thread-safe name → handler map.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: Arc<RwLock<HashMap<String, Arc<dyn CommandHandler>>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate and malformed names are rejected.
    pub fn register(&self, handler: Arc<dyn CommandHandler>) -> Result<(), NexusError> {
        let name = handler.name().to_string();
        validate_name(&name)?;
        let mut map = self.commands.write().expect("registry lock poisoned");
        if map.contains_key(&name) {
            return Err(NexusError::InvalidArgument(format!(
                "command '{name}' is already registered"
            )));
        }
        map.insert(name, handler);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.commands
            .write()
            .expect("registry lock poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    /// Registered names, sorted for deterministic completion output.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .commands
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn descriptions(&self) -> Vec<(String, String)> {
        let map = self.commands.read().expect("registry lock poisoned");
        let mut out: Vec<(String, String)> = map
            .values()
            .map(|h| (h.name().to_string(), h.description().to_string()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(name: &str) -> Arc<dyn CommandHandler> {
        Arc::new(FnCommand::new(name, "noop", |_ctx| Ok(Value::null())))
    }

    #[test]
    fn register_lookup_unregister() {
        let reg = CommandRegistry::new();
        reg.register(noop("pwd")).unwrap();
        assert!(reg.contains("pwd"));
        assert!(reg.get("pwd").is_some());
        assert!(reg.unregister("pwd"));
        assert!(!reg.contains("pwd"));
    }

    #[test]
    fn duplicates_are_rejected() {
        let reg = CommandRegistry::new();
        reg.register(noop("cd")).unwrap();
        assert!(reg.register(noop("cd")).is_err());
    }

    #[test]
    fn bad_names_are_rejected() {
        let reg = CommandRegistry::new();
        assert!(reg.register(noop("")).is_err());
        assert!(reg.register(noop("has space")).is_err());
        assert!(reg.register(noop("rm;rf")).is_err());
    }

    #[test]
    fn names_are_sorted() {
        let reg = CommandRegistry::new();
        reg.register(noop("pwd")).unwrap();
        reg.register(noop("cd")).unwrap();
        assert_eq!(reg.names(), vec!["cd", "pwd"]);
    }
}
