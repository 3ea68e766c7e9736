//! End-to-end scenarios through the assembled kernel.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;

use nexus_caps::AuditQuery;
use nexus_kernel::{is_exit_request, Kernel};
use nexus_recorder::ReplayOptions;
use nexus_types::{PolicyName, ShellConfig, ShellState, Value};

fn host_env() -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if let Ok(path) = std::env::var("PATH") {
        env.insert("PATH".to_string(), path);
    }
    env
}

fn kernel_at(dir: &TempDir, policy: PolicyName) -> Kernel {
    let mut config = ShellConfig::default();
    config.security.default_policy = policy;
    let state = Arc::new(ShellState::new(
        dir.path().to_string_lossy().into_owned(),
        host_env(),
    ));
    Kernel::init_with_state(config, state).expect("kernel init")
}

fn kernel(dir: &TempDir) -> Kernel {
    kernel_at(dir, PolicyName::Developer)
}

#[test]
fn traditional_pipeline_with_external_binaries() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    let result = k.execute_line("echo hello | wc -c").unwrap();
    assert_eq!(result.get("code").and_then(Value::as_int), Some(0));
    assert_eq!(result.get("stdout").and_then(|v| v.as_str()), Some("6\n"));
    assert_eq!(result.get("stderr").and_then(|v| v.as_str()), Some(""));
    assert_eq!(result.get("success").and_then(Value::as_bool), Some(true));
}

#[test]
fn scripted_directory_filter_is_gated_and_audited() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("big.dat"), vec![0u8; 4096]).unwrap();
    std::fs::write(dir.path().join("small.dat"), vec![0u8; 8]).unwrap();
    let k = kernel(&dir);

    let result = k
        .execute_line("fs.dir(\".\").filter(f => f.size > 1024).map(f => f.name)")
        .unwrap();
    let names: Vec<&str> = result
        .as_list()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(names, vec!["big.dat"]);

    let audit = k.audit_query(&AuditQuery {
        action_contains: Some("fs:read".into()),
        ..Default::default()
    });
    assert!(!audit.is_empty());
    assert!(audit.iter().any(|r| r.resource == "." && r.granted));
}

#[test]
fn cd_inside_transaction_rolls_back() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("sub");
    std::fs::create_dir(&sub).unwrap();
    let k = kernel(&dir);
    let original_cwd = k.state().cwd();

    let tx = k.begin_transaction();
    k.execute_line(&format!("cd {}", sub.display())).unwrap();
    // The mutation is visible to subsequent commands...
    let pwd = k.execute_line("pwd").unwrap();
    assert!(pwd.as_str().unwrap().ends_with("sub"));

    // ...until the transaction rolls back.
    k.rollback_transaction(tx).unwrap();
    assert_eq!(k.state().cwd(), original_cwd);
}

#[test]
fn sandbox_policy_denies_kill_with_one_audit_entry() {
    let dir = TempDir::new().unwrap();
    let k = kernel_at(&dir, PolicyName::Sandbox);

    let err = k.execute_line("proc.kill(1)").unwrap_err();
    assert_eq!(err.kind(), nexus_types::ErrorKind::PermissionDenied);

    let audit = k.audit_query(&AuditQuery {
        action_contains: Some("proc:kill".into()),
        ..Default::default()
    });
    assert_eq!(audit.len(), 1);
    assert!(!audit[0].granted);
    assert_eq!(audit[0].resource, "1");
}

#[test]
fn recording_two_commands_persists_both() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    k.start_recording(Some("r1")).unwrap();
    k.execute_line("pwd").unwrap();
    k.execute_line("date").unwrap();
    let (recording, path) = k.stop_recording().unwrap();

    assert_eq!(recording.commands.len(), 2);
    for entry in &recording.commands {
        assert!(!entry.input.is_empty());
        assert!(entry.result.is_some());
    }
    assert!(path.exists());
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"commands\""));

    let loaded = k.load_recording("r1").unwrap();
    assert_eq!(loaded.commands.len(), 2);
}

#[test]
fn snapshots_are_recorded_alongside_commands() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    k.start_recording(Some("with-snapshot")).unwrap();
    k.execute_line("pwd").unwrap();
    k.create_snapshot("manual", Some("midway")).unwrap();
    let (recording, _) = k.stop_recording().unwrap();

    assert_eq!(recording.snapshots.len(), 1);
    assert_eq!(recording.snapshots[0].snapshot_type, "manual");
    assert!(recording.snapshots[0]
        .shell_state
        .get("cwd")
        .is_some());
}

#[test]
fn quoted_token_with_adjacent_suffix() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    // `"a b".txt` tokenises to the single positional arg `a b.txt`.
    let result = k.execute_line("echo \"a b\".txt").unwrap();
    assert_eq!(
        result.get("stdout").and_then(|v| v.as_str()),
        Some("a b.txt\n")
    );
}

#[test]
fn replay_of_stable_commands_has_no_divergence() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    k.start_recording(Some("stable")).unwrap();
    k.execute_line("pwd").unwrap();
    k.execute_line("echo fixed").unwrap();
    let (recording, _) = k.stop_recording().unwrap();

    let report = k.replay(&recording, &ReplayOptions::default(), |_| true);
    assert_eq!(report.executed, 2);
    assert!(
        report.divergences.is_empty(),
        "divergences: {:?}",
        report.divergences
    );
    assert!(!k.is_recording(), "replay must not re-record");
}

#[test]
fn replay_reports_divergence_when_state_changed() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    k.start_recording(Some("diverging")).unwrap();
    k.execute_line("cat note.txt | wc -l").unwrap_or_else(|_| Value::null());
    // `cat` fails identically both times; make a command whose output changes.
    std::fs::write(dir.path().join("grows.txt"), "one\n").unwrap();
    k.execute_line("cat grows.txt").unwrap();
    let (recording, _) = k.stop_recording().unwrap();

    std::fs::write(dir.path().join("grows.txt"), "one\ntwo\n").unwrap();
    let report = k.replay(&recording, &ReplayOptions::default(), |_| true);
    assert!(!report.divergences.is_empty());
    assert!(!report.aborted);
}

#[test]
fn transactional_batch_rolls_back_env() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);
    let before = k.state().snapshot();

    let commands = vec![
        "export STAGE=one".to_string(),
        "no-such-binary-5c1d".to_string(),
    ];
    let err = k.execute_transaction(&commands, None).unwrap_err();
    assert_eq!(err.kind(), nexus_types::ErrorKind::TransactionAborted);
    assert_eq!(k.state().snapshot(), before);
}

#[test]
fn exit_builtin_signals_the_loop() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);
    let v = k.execute_line("exit").unwrap();
    assert!(is_exit_request(&v));
    assert!(!is_exit_request(&Value::string("exit")));
}

#[test]
fn completions_cover_builtins_and_surfaces() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);

    let builtin = k.completions("pw", 2);
    assert!(builtin.contains(&"pwd".to_string()));

    let surface = k.completions("proc.k", 6);
    assert_eq!(surface, vec!["proc.kill"]);
}

#[test]
fn metrics_accumulate_and_reset() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);
    k.execute_line("pwd").unwrap();
    k.execute_line("pwd").unwrap();
    // The metrics thread aggregates asynchronously.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let metrics = k.metrics();
    assert!(metrics.commands_executed >= 2);

    k.reset_metrics();
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(k.metrics().commands_executed, 0);
}

#[test]
fn audit_log_file_is_line_oriented_json() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);
    k.execute_line("pwd").unwrap();
    k.shutdown();

    // The writer thread drains its queue asynchronously.
    let path = dir.path().join(".nexus").join("audit.log");
    let mut log = String::new();
    for _ in 0..50 {
        log = std::fs::read_to_string(&path).unwrap_or_default();
        if !log.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let mut lines = 0;
    for line in log.lines() {
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(record.get("action").is_some());
        assert!(record.get("granted").is_some());
        lines += 1;
    }
    assert!(lines >= 1);
}

#[test]
fn shutdown_is_idempotent_and_blocks_execution() {
    let dir = TempDir::new().unwrap();
    let k = kernel(&dir);
    k.shutdown();
    k.shutdown();
    assert!(!k.is_running());
    let err = k.execute_line("pwd").unwrap_err();
    assert_eq!(err.kind(), nexus_types::ErrorKind::Cancelled);
}
