//! The external-process path: commands with no registered handler spawn a
//! child resolved through host PATH rules, with no shell metacharacter
//! re-interpretation.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use nexus_types::value::{map_value, ValueKind};
use nexus_types::{CommandContext, NexusError, ParsedCommand, Value};

/// Bytes fed to a child's stdin for a given pipeline input value.
///
/// Process-result maps forward their captured stdout; strings and bytes
/// pass through; anything else is rendered as JSON.
pub fn stdin_bytes(value: &Value) -> Vec<u8> {
    match &value.kind {
        ValueKind::Str(s) => s.clone().into_bytes(),
        ValueKind::Bytes(b) => b.clone(),
        ValueKind::Map(entries) => match entries.get("stdout").map(|v| &v.kind) {
            Some(ValueKind::Str(s)) => s.clone().into_bytes(),
            _ => serde_json::to_vec(&value.to_json()).unwrap_or_default(),
        },
        ValueKind::Null => Vec::new(),
        _ => serde_json::to_vec(&value.to_json()).unwrap_or_default(),
    }
}

/// Reassemble argv from a parsed command, putting flags back in wire form.
fn argv_tail(command: &ParsedCommand) -> Vec<String> {
    let mut argv = Vec::new();
    for (key, value) in &command.flags {
        if key.len() == 1 {
            argv.push(format!("-{key}"));
        } else {
            match value.as_str() {
                Some(v) => argv.push(format!("--{key}={v}")),
                None => argv.push(format!("--{key}")),
            }
        }
    }
    argv.extend(command.args.iter().cloned());
    argv
}

/// Spawn an external command under the context's cwd/env and return the
/// `{code, stdout, stderr, success}` map. Spawn failure (binary not found)
/// is a thrown error; a non-zero exit is not.
pub fn run(command: &ParsedCommand, ctx: &CommandContext) -> Result<Value, NexusError> {
    let mut child = Command::new(&command.name)
        .args(argv_tail(command))
        .current_dir(&ctx.cwd)
        .env_clear()
        .envs(ctx.env.iter())
        .stdin(if ctx.pipeline_input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(if ctx.capture_stdio {
            Stdio::piped()
        } else {
            Stdio::inherit()
        })
        .stderr(if ctx.capture_stdio {
            Stdio::piped()
        } else {
            Stdio::inherit()
        })
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                NexusError::NotFound(format!("command '{}'", command.name))
            }
            _ => NexusError::ExecutionFailure(format!("spawn {}: {e}", command.name)),
        })?;

    if let Some(input) = &ctx.pipeline_input {
        let bytes = stdin_bytes(input);
        if let Some(mut stdin) = child.stdin.take() {
            // The child may exit without reading; a broken pipe is fine.
            let _ = stdin.write_all(&bytes);
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| NexusError::ExecutionFailure(format!("wait {}: {e}", command.name)))?;

    let code = output.status.code().unwrap_or(-1);
    debug!(name = %command.name, code, "external command finished");
    Ok(map_value(vec![
        ("code", Value::int(code as i64)),
        (
            "stdout",
            Value::string(String::from_utf8_lossy(&output.stdout).into_owned()),
        ),
        (
            "stderr",
            Value::string(String::from_utf8_lossy(&output.stderr).into_owned()),
        ),
        ("success", Value::bool(output.status.success())),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx() -> CommandContext {
        let mut env = BTreeMap::new();
        // PATH is needed for argv[0] resolution.
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        CommandContext {
            cwd: std::env::temp_dir().to_string_lossy().into_owned(),
            env,
            ..CommandContext::default()
        }
    }

    fn cmd(name: &str, args: &[&str]) -> ParsedCommand {
        let mut c = ParsedCommand::new(name);
        c.args = args.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let result = run(&cmd("echo", &["hello"]), &ctx()).unwrap();
        assert_eq!(result.get("code").and_then(Value::as_int), Some(0));
        assert_eq!(result.get("stdout").and_then(|v| v.as_str()), Some("hello\n"));
        assert_eq!(result.get("success").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let result = run(&cmd("false", &[]), &ctx()).unwrap();
        assert_eq!(result.get("success").and_then(Value::as_bool), Some(false));
        assert_ne!(result.get("code").and_then(Value::as_int), Some(0));
    }

    #[test]
    fn missing_binary_is_thrown() {
        let err = run(&cmd("no-such-binary-a3f9", &[]), &ctx()).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::NotFound);
    }

    #[test]
    fn pipeline_input_feeds_stdin() {
        let mut c = ctx();
        c.pipeline_input = Some(Value::string("line one\nline two\n"));
        let result = run(&cmd("wc", &["-l"]), &c).unwrap();
        assert_eq!(
            result
                .get("stdout")
                .and_then(|v| v.as_str())
                .map(str::trim),
            Some("2")
        );
    }

    #[test]
    fn map_input_forwards_captured_stdout() {
        let upstream = map_value(vec![
            ("code", Value::int(0)),
            ("stdout", Value::string("hello\n")),
            ("stderr", Value::string(String::new())),
            ("success", Value::bool(true)),
        ]);
        let mut c = ctx();
        c.pipeline_input = Some(upstream);
        let result = run(&cmd("wc", &["-c"]), &c).unwrap();
        assert_eq!(
            result
                .get("stdout")
                .and_then(|v| v.as_str())
                .map(str::trim),
            Some("6")
        );
    }

    #[test]
    fn no_shell_metacharacter_interpretation() {
        let result = run(&cmd("echo", &["$HOME", ";", "ls"]), &ctx()).unwrap();
        assert_eq!(
            result.get("stdout").and_then(|v| v.as_str()),
            Some("$HOME ; ls\n")
        );
    }
}
