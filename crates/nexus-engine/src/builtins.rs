//! Core shell-state built-ins: the commands that read or mutate `cwd`,
//! `env`, and the alias table, plus `help` and `exit`.
//!
//! The wider command set (file, process, network, system, dev wrappers)
//! registers through the same [`CommandRegistry`] but lives outside the
//! core.

use std::path::Path;
use std::sync::Arc;

use nexus_types::value::map_value;
use nexus_types::{CommandContext, NexusError, ShellState, Value};

use crate::registry::{CommandRegistry, FnCommand};

/// Register the core built-ins against a shell state.
pub fn register_core(registry: &CommandRegistry, state: Arc<ShellState>) -> Result<(), NexusError> {
    let s = Arc::clone(&state);
    registry.register(Arc::new(FnCommand::new(
        "cd",
        "Change the working directory",
        move |ctx: &CommandContext| {
            let target = match ctx.args.first() {
                Some(path) => {
                    let p = Path::new(path);
                    if p.is_absolute() {
                        p.to_path_buf()
                    } else {
                        Path::new(&ctx.cwd).join(p)
                    }
                }
                None => ctx
                    .env
                    .get("HOME")
                    .map(Into::into)
                    .ok_or_else(|| NexusError::InvalidArgument("cd: HOME is not set".into()))?,
            };
            let meta = std::fs::metadata(&target)
                .map_err(|_| NexusError::NotFound(format!("cd: {}", target.display())))?;
            if !meta.is_dir() {
                return Err(NexusError::InvalidArgument(format!(
                    "cd: {} is not a directory",
                    target.display()
                )));
            }
            let canonical = target.canonicalize().unwrap_or(target);
            let cwd = canonical.to_string_lossy().into_owned();
            s.set_cwd(cwd.clone());
            Ok(Value::string(cwd))
        },
    )))?;

    registry.register(Arc::new(FnCommand::new(
        "pwd",
        "Print the working directory",
        |ctx: &CommandContext| Ok(Value::string(ctx.cwd.clone())),
    )))?;

    registry.register(Arc::new(FnCommand::new(
        "env",
        "List environment variables",
        |ctx: &CommandContext| {
            Ok(Value::map(
                ctx.env
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::string(v.clone())))
                    .collect(),
            ))
        },
    )))?;

    let s = Arc::clone(&state);
    registry.register(Arc::new(FnCommand::new(
        "export",
        "Set an environment variable (KEY=VALUE)",
        move |ctx: &CommandContext| {
            let arg = ctx
                .args
                .first()
                .ok_or_else(|| NexusError::InvalidArgument("export: usage KEY=VALUE".into()))?;
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| NexusError::InvalidArgument("export: usage KEY=VALUE".into()))?;
            if key.is_empty() {
                return Err(NexusError::InvalidArgument("export: empty key".into()));
            }
            s.set_env_var(key, value);
            Ok(Value::string(format!("{key}={value}")))
        },
    )))?;

    let s = Arc::clone(&state);
    registry.register(Arc::new(FnCommand::new(
        "unset",
        "Remove an environment variable",
        move |ctx: &CommandContext| {
            let key = ctx
                .args
                .first()
                .ok_or_else(|| NexusError::InvalidArgument("unset: missing variable name".into()))?;
            s.unset_env_var(key);
            Ok(Value::null())
        },
    )))?;

    let s = Arc::clone(&state);
    registry.register(Arc::new(FnCommand::new(
        "alias",
        "List aliases, or define one (alias name target...)",
        move |ctx: &CommandContext| {
            if ctx.args.is_empty() {
                return Ok(Value::map(
                    s.aliases()
                        .into_iter()
                        .map(|(k, v)| (k, Value::string(v)))
                        .collect(),
                ));
            }
            // Accept both `alias ll "ls -l"` and `alias ll=ls -l`.
            let (name, target) = if let Some((n, t)) = ctx.args[0].split_once('=') {
                let mut target = t.to_string();
                if ctx.args.len() > 1 {
                    target.push(' ');
                    target.push_str(&ctx.args[1..].join(" "));
                }
                (n.to_string(), target)
            } else {
                if ctx.args.len() < 2 {
                    return Err(NexusError::InvalidArgument(
                        "alias: usage `alias name target...`".into(),
                    ));
                }
                (ctx.args[0].clone(), ctx.args[1..].join(" "))
            };
            if name.is_empty() || target.trim().is_empty() {
                return Err(NexusError::InvalidArgument(
                    "alias: name and target must be non-empty".into(),
                ));
            }
            if name == "alias" || name == "unalias" {
                return Err(NexusError::InvalidArgument(format!(
                    "alias: '{name}' is reserved"
                )));
            }
            s.set_alias(name.clone(), target.clone());
            Ok(Value::string(format!("{name}='{target}'")))
        },
    )))?;

    let s = Arc::clone(&state);
    registry.register(Arc::new(FnCommand::new(
        "unalias",
        "Remove an alias",
        move |ctx: &CommandContext| {
            let name = ctx
                .args
                .first()
                .ok_or_else(|| NexusError::InvalidArgument("unalias: missing name".into()))?;
            if s.remove_alias(name) {
                Ok(Value::null())
            } else {
                Err(NexusError::NotFound(format!("alias '{name}'")))
            }
        },
    )))?;

    let reg = registry.clone();
    registry.register(Arc::new(FnCommand::new(
        "help",
        "List built-in commands",
        move |_ctx: &CommandContext| {
            let mut lines = vec!["Built-in commands:".to_string()];
            for (name, description) in reg.descriptions() {
                lines.push(format!("  {name:<10} {description}"));
            }
            lines.push(String::new());
            lines.push("Scripted surfaces: fs.*, proc.*, net.*, utils.*".to_string());
            Ok(Value::string(lines.join("\n")))
        },
    )))?;

    registry.register(Arc::new(FnCommand::new(
        "exit",
        "Leave the shell",
        |_ctx: &CommandContext| {
            Ok(map_value(vec![
                ("exit", Value::bool(true)),
                ("message", Value::string("Goodbye!")),
            ]))
        },
    )))?;

    Ok(())
}
