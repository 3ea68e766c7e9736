//! The `proc` surface: exec, list, kill, info, monitor.
//!
//! Process inspection reads `/proc` directly (Linux); other platforms
//! report `NotFound` for list/info. Signals go through `nix`.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use nexus_types::{CommandContext, NexusError, Value};
use nexus_types::value::map_value;

use crate::fs::resolve_path;
use crate::handles::NativeResource;
use crate::ObjectBridge;

/// Options accepted by `proc.exec`.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: Vec<(String, String)>,
    pub timeout_ms: Option<u64>,
}

/// Poll interval while waiting on a child with a deadline.
const WAIT_POLL: Duration = Duration::from_millis(10);

impl ObjectBridge {
    /// `proc.exec(cmd, {args?, cwd?, env?, timeout?})` →
    /// `{code, stdout, stderr, success}`. Spawn failure is an error; a
    /// non-zero exit is only `success: false`.
    pub fn proc_exec(
        &self,
        ctx: &CommandContext,
        cmd: &str,
        opts: &ExecOptions,
    ) -> Result<Value, NexusError> {
        self.caps().require("proc:exec", cmd)?;

        let cwd = opts
            .cwd
            .as_deref()
            .map(|c| resolve_path(&ctx.cwd, c))
            .unwrap_or_else(|| ctx.cwd.clone().into());

        let mut command = Command::new(cmd);
        command
            .args(&opts.args)
            .current_dir(&cwd)
            .envs(ctx.env.iter())
            .envs(opts.env.iter().cloned())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NexusError::NotFound(format!("command '{cmd}'")),
            _ => NexusError::ExecutionFailure(format!("spawn {cmd}: {e}")),
        })?;

        if let Some(timeout_ms) = opts.timeout_ms {
            let deadline = Instant::now() + Duration::from_millis(timeout_ms);
            loop {
                if let Err(e) = ctx.observe_cancel() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e);
                }
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            return Err(NexusError::Timeout(format!(
                                "{cmd} exceeded {timeout_ms}ms"
                            )));
                        }
                        std::thread::sleep(WAIT_POLL);
                    }
                    Err(e) => return Err(NexusError::ExecutionFailure(format!("wait: {e}"))),
                }
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| NexusError::ExecutionFailure(format!("wait {cmd}: {e}")))?;
        let code = output.status.code().unwrap_or(-1);
        debug!(cmd, code, "proc.exec finished");
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

    /// `proc.list()` -- `{pid, name, cpu, memory, uptime}` per process.
    pub fn proc_list(&self, _ctx: &CommandContext) -> Result<Value, NexusError> {
        self.caps().require("proc:list", "")?;
        let mut processes = Vec::new();
        for pid in enumerate_pids()? {
            if let Some(info) = read_proc_summary(pid) {
                processes.push(info);
            }
        }
        Ok(Value::list(processes))
    }

    /// `proc.kill(pid, signal)` -- resolves once the signal is delivered.
    pub fn proc_kill(
        &self,
        _ctx: &CommandContext,
        pid: i32,
        signal: Option<&str>,
    ) -> Result<Value, NexusError> {
        self.caps().require("proc:kill", &pid.to_string())?;
        let sig = parse_signal(signal.unwrap_or("SIGTERM"))?;
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), sig) {
            Ok(()) => Ok(Value::bool(true)),
            Err(nix::errno::Errno::ESRCH) => {
                Err(NexusError::NotFound(format!("process {pid}")))
            }
            Err(nix::errno::Errno::EPERM) => Err(NexusError::PermissionDenied {
                action: "proc:kill".to_string(),
                resource: pid.to_string(),
            }),
            Err(e) => Err(NexusError::ExecutionFailure(format!("kill {pid}: {e}"))),
        }
    }

    /// `proc.info(pid)` -- detailed record, or null when the process is gone.
    pub fn proc_info(&self, _ctx: &CommandContext, pid: i32) -> Result<Value, NexusError> {
        self.caps().require("proc:info", &pid.to_string())?;
        Ok(read_proc_detail(pid).unwrap_or_else(Value::null))
    }

    /// `proc.monitor(cb, interval_ms)` -- samples the process table on its
    /// own thread until the returned handle is stopped. Samples are also
    /// buffered on the handle.
    pub fn proc_monitor(
        self: &Arc<Self>,
        ctx: &CommandContext,
        callback: Option<Arc<dyn Fn(Value) + Send + Sync>>,
        interval_ms: u64,
    ) -> Result<u64, NexusError> {
        self.caps().require("proc:monitor", "")?;
        if interval_ms == 0 {
            return Err(NexusError::InvalidArgument(
                "monitor interval must be positive".to_string(),
            ));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let samples = Arc::new(Mutex::new(Vec::new()));

        let bridge = Arc::clone(self);
        let thread_ctx = ctx.clone();
        let stop_flag = Arc::clone(&stopped);
        let buffer = Arc::clone(&samples);
        std::thread::Builder::new()
            .name("proc-monitor".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(interval_ms));
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    if let Ok(sample) = bridge.proc_list(&thread_ctx) {
                        {
                            let mut buf = buffer.lock().expect("monitor buffer lock poisoned");
                            if buf.len() == 256 {
                                buf.remove(0);
                            }
                            buf.push(sample.clone());
                        }
                        if let Some(cb) = &callback {
                            cb(sample);
                        }
                    }
                }
            })
            .map_err(|e| NexusError::Internal(format!("monitor thread: {e}")))?;

        let reservation = self.memory().pin(64)?;
        let id = self.handles().pin(
            NativeResource::Monitor { stopped, samples },
            Some(reservation),
        );
        Ok(id)
    }

    /// Drain buffered samples from a monitor handle.
    pub fn proc_monitor_samples(&self, handle: u64) -> Result<Value, NexusError> {
        self.handles().with(handle, |resource| match resource {
            NativeResource::Monitor { samples, .. } => {
                let mut buf = samples.lock().expect("monitor buffer lock poisoned");
                Ok(Value::list(std::mem::take(&mut *buf)))
            }
            other => Err(NexusError::InvalidArgument(format!(
                "handle is a {}, not a monitor",
                other.kind()
            ))),
        })?
    }
}

fn parse_signal(name: &str) -> Result<nix::sys::signal::Signal, NexusError> {
    use nix::sys::signal::Signal;
    let normalized = name.to_ascii_uppercase();
    let normalized = if normalized.starts_with("SIG") {
        normalized
    } else {
        format!("SIG{normalized}")
    };
    match normalized.as_str() {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        "SIGSTOP" => Ok(Signal::SIGSTOP),
        "SIGCONT" => Ok(Signal::SIGCONT),
        other => Err(NexusError::InvalidArgument(format!(
            "unknown signal '{other}'"
        ))),
    }
}

#[cfg(target_os = "linux")]
fn enumerate_pids() -> Result<Vec<i32>, NexusError> {
    let mut pids = Vec::new();
    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        if let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() {
            pids.push(pid);
        }
    }
    Ok(pids)
}

#[cfg(not(target_os = "linux"))]
fn enumerate_pids() -> Result<Vec<i32>, NexusError> {
    Err(NexusError::NotFound(
        "process enumeration is only available on Linux".to_string(),
    ))
}

#[cfg(target_os = "linux")]
fn read_status_fields(pid: i32) -> Option<(String, u64)> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let mut name = String::new();
    let mut rss_kb = 0u64;
    for line in status.lines() {
        if let Some(v) = line.strip_prefix("Name:\t") {
            name = v.trim().to_string();
        } else if let Some(v) = line.strip_prefix("VmRSS:") {
            rss_kb = v
                .trim()
                .trim_end_matches(" kB")
                .trim()
                .parse()
                .unwrap_or(0);
        }
    }
    Some((name, rss_kb))
}

#[cfg(target_os = "linux")]
fn read_stat_times(pid: i32) -> Option<(f64, f64)> {
    // /proc/<pid>/stat: fields 14/15 are utime/stime, 22 is starttime,
    // all in clock ticks. The comm field may contain spaces, so split
    // after the closing paren.
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = stat.rsplit_once(") ").map(|(_, r)| r)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    let starttime: u64 = fields.get(19)?.parse().ok()?;

    let ticks_per_sec = 100.0;
    let cpu_seconds = (utime + stime) as f64 / ticks_per_sec;

    let uptime_text = std::fs::read_to_string("/proc/uptime").ok()?;
    let system_uptime: f64 = uptime_text.split_whitespace().next()?.parse().ok()?;
    let process_uptime = (system_uptime - starttime as f64 / ticks_per_sec).max(0.0);
    Some((cpu_seconds, process_uptime))
}

#[cfg(target_os = "linux")]
fn read_proc_summary(pid: i32) -> Option<Value> {
    let (name, rss_kb) = read_status_fields(pid)?;
    let (cpu_seconds, uptime) = read_stat_times(pid).unwrap_or((0.0, 0.0));
    // Average CPU share over the process lifetime, as a percentage.
    let cpu = if uptime > 0.0 {
        (cpu_seconds / uptime * 100.0).min(100.0 * 64.0)
    } else {
        0.0
    };
    Some(map_value(vec![
        ("pid", Value::int(pid as i64)),
        ("name", Value::string(name)),
        ("cpu", Value::float(cpu)),
        ("memory", Value::int((rss_kb * 1024) as i64)),
        ("uptime", Value::float(uptime)),
    ]))
}

#[cfg(not(target_os = "linux"))]
fn read_proc_summary(_pid: i32) -> Option<Value> {
    None
}

#[cfg(target_os = "linux")]
fn read_proc_detail(pid: i32) -> Option<Value> {
    let summary = read_proc_summary(pid)?;
    let cmdline = std::fs::read(format!("/proc/{pid}/cmdline"))
        .map(|bytes| {
            bytes
                .split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let cwd = std::fs::read_link(format!("/proc/{pid}/cwd"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut entries = summary.as_map().cloned()?;
    entries.insert("cmdline".to_string(), Value::string(cmdline));
    entries.insert("cwd".to_string(), Value::string(cwd));
    Some(Value::map(entries))
}

#[cfg(not(target_os = "linux"))]
fn read_proc_detail(_pid: i32) -> Option<Value> {
    None
}
