//! Alias resolution.
//!
//! A single lookup against the alias table, never recursive: if the
//! expansion's head is itself aliased the resolution is rejected, which
//! makes cycles impossible by construction.

use nexus_types::{NexusError, ParsedCommand, ShellState};

/// Apply alias resolution to a command's name. The expansion's own
/// arguments are prepended to the command's arguments.
///
/// Terminates in at most one step; an aliased expansion head is an error.
pub fn resolve(state: &ShellState, command: &ParsedCommand) -> Result<ParsedCommand, NexusError> {
    let Some(target) = state.alias(&command.name) else {
        return Ok(command.clone());
    };

    let mut parts = target.split_whitespace();
    let Some(head) = parts.next() else {
        return Err(NexusError::InvalidArgument(format!(
            "alias '{}' expands to nothing",
            command.name
        )));
    };

    if state.alias(head).is_some() {
        return Err(NexusError::alias_cycle(&command.name));
    }

    let mut resolved = command.clone();
    resolved.name = head.to_string();
    let mut args: Vec<String> = parts.map(str::to_string).collect();
    args.extend(resolved.args);
    resolved.args = args;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn state() -> ShellState {
        ShellState::new("/", BTreeMap::new())
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        let mut c = ParsedCommand::new(name);
        c.args = args.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn unaliased_names_pass_through() {
        let s = state();
        let resolved = resolve(&s, &cmd("ls", &["/tmp"])).unwrap();
        assert_eq!(resolved.name, "ls");
        assert_eq!(resolved.args, vec!["/tmp"]);
    }

    #[test]
    fn alias_expands_once_with_args_prepended() {
        let s = state();
        s.set_alias("ll", "ls -l");
        let resolved = resolve(&s, &cmd("ll", &["/var"])).unwrap();
        assert_eq!(resolved.name, "ls");
        assert_eq!(resolved.args, vec!["-l", "/var"]);
    }

    #[test]
    fn two_step_chain_is_a_cycle_error() {
        let s = state();
        s.set_alias("a", "b");
        s.set_alias("b", "ls");
        let err = resolve(&s, &cmd("a", &[])).unwrap_err();
        assert!(err.to_string().contains("alias cycle"));
    }

    #[test]
    fn self_alias_is_a_cycle_error() {
        let s = state();
        s.set_alias("x", "x -v");
        let err = resolve(&s, &cmd("x", &[])).unwrap_err();
        assert!(err.to_string().contains("alias cycle"));
    }

    #[test]
    fn empty_expansion_is_invalid() {
        let s = state();
        s.set_alias("nop", "  ");
        assert!(resolve(&s, &cmd("nop", &[])).is_err());
    }
}
