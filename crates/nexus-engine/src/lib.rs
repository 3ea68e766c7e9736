//! The execution engine: parses lines into plans and dispatches them to
//! built-ins, the scripted evaluator, or external processes.
//!
//! Per command invocation the state machine is fixed:
//! `parsed → permission_check → (record?) → execute → (record_result) → return`.
//! Permission failure is terminal and skips execution; recording is
//! best-effort and never blocks execution.

pub mod aliases;
pub mod builtins;
pub mod external;
pub mod metrics;
pub mod pool;
pub mod registry;

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use nexus_bridge::{ObjectBridge, ScriptHost};
use nexus_caps::CapabilityStore;
use nexus_parser::Parser;
use nexus_types::value::map_value;
use nexus_types::{
    CancelToken, CommandContext, NexusError, ParsedCommand, ShellState, Value,
};

pub use metrics::{CommandStats, MetricsSnapshot};
pub use pool::{TaskHandle, WorkerPool};
pub use registry::{CommandHandler, CommandRegistry, FnCommand};

/// Recording integration, injected by the kernel so the engine stays
/// independent of the recorder's storage.
pub trait RecorderSink: Send + Sync {
    /// Called before execution. Returns a sequence id when a recording is
    /// active (and the context is not a replay).
    fn record_command(&self, input: &str, ctx: &CommandContext) -> Option<u64>;

    /// Called after execution with the outcome and latency.
    fn record_result(
        &self,
        seq: u64,
        result: &Result<Value, NexusError>,
        latency_us: u64,
    );
}

/// Dispatches parsed plans and owns the per-command metrics stream.
pub struct ExecutionEngine {
    parser: Arc<Parser>,
    registry: CommandRegistry,
    caps: Arc<CapabilityStore>,
    script: ScriptHost,
    state: Arc<ShellState>,
    pool: Arc<WorkerPool>,
    metrics: metrics::MetricsSink,
    recorder: RwLock<Option<Arc<dyn RecorderSink>>>,
}

impl ExecutionEngine {
    pub fn new(
        parser: Arc<Parser>,
        registry: CommandRegistry,
        caps: Arc<CapabilityStore>,
        bridge: Arc<ObjectBridge>,
        state: Arc<ShellState>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            parser,
            registry,
            caps,
            script: ScriptHost::new(bridge),
            state,
            pool,
            metrics: metrics::MetricsSink::spawn(),
            recorder: RwLock::new(None),
        }
    }

    /// Install the recording sink. The kernel calls this once the recorder
    /// exists; passing `None` detaches it.
    pub fn set_recorder(&self, sink: Option<Arc<dyn RecorderSink>>) {
        *self.recorder.write().expect("recorder slot poisoned") = sink;
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn parser(&self) -> &Arc<Parser> {
        &self.parser
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Build a fresh context from a consistent shell-state snapshot, with
    /// the capability store installed as the gate.
    pub fn make_context(&self) -> CommandContext {
        let snapshot = self.state.snapshot();
        CommandContext {
            cwd: snapshot.cwd,
            env: snapshot.env,
            caps: Arc::clone(&self.caps) as Arc<dyn nexus_types::CapabilityGate>,
            ..CommandContext::default()
        }
    }

    /// Primary entry point: parse and dispatch one input line.
    pub fn execute(&self, line: &str, ctx: &CommandContext) -> Result<Value, NexusError> {
        let start = Instant::now();
        let seq = {
            let sink = self.recorder.read().expect("recorder slot poisoned");
            sink.as_ref().and_then(|s| s.record_command(line, ctx))
        };

        let result = self.dispatch(line, ctx);

        if let Some(seq) = seq {
            let sink = self.recorder.read().expect("recorder slot poisoned");
            if let Some(s) = sink.as_ref() {
                s.record_result(seq, &result, start.elapsed().as_micros() as u64);
            }
        }
        result
    }

    fn dispatch(&self, line: &str, ctx: &CommandContext) -> Result<Value, NexusError> {
        let plan = self.parser.parse(line)?;

        if plan.is_scripted() {
            let script = plan
                .script
                .as_deref()
                .ok_or_else(|| NexusError::Internal("scripted plan without script".into()))?;
            return self.execute_scripted(script, ctx);
        }
        if plan.commands.is_empty() {
            return Ok(Value::null());
        }
        if plan.commands.len() == 1 && plan.commands[0].background {
            return self.spawn_background(plan.commands.into_iter().next().expect("one command"), ctx);
        }
        self.execute_pipeline(&plan.commands, ctx)
    }

    /// Chain segments, passing each stage's value to the next via
    /// `pipeline_input`. A failing stage aborts the pipeline.
    pub fn execute_pipeline(
        &self,
        commands: &[ParsedCommand],
        ctx: &CommandContext,
    ) -> Result<Value, NexusError> {
        let mut carried = ctx.pipeline_input.clone();
        for (index, command) in commands.iter().enumerate() {
            let mut stage_ctx = ctx.for_stage(index, carried.take());
            stage_ctx.pipeline_length = commands.len();
            carried = Some(self.execute_single(command, &stage_ctx)?);
        }
        Ok(carried.unwrap_or_else(Value::null))
    }

    /// Hand a script to the embedded evaluator.
    pub fn execute_scripted(&self, script: &str, ctx: &CommandContext) -> Result<Value, NexusError> {
        let start = Instant::now();
        let result = self.script.eval(script, ctx);
        self.metrics.record(
            "script",
            start.elapsed().as_micros() as u64,
            result.is_ok(),
        );
        result
    }

    /// One command: alias resolution, permission gate, then the registered
    /// handler or the external-process path.
    pub fn execute_single(
        &self,
        command: &ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Value, NexusError> {
        let resolved = aliases::resolve(&self.state, command)?;
        let start = Instant::now();

        let outcome = (|| {
            self.caps.require("command:execute", &resolved.name)?;
            let mut cmd_ctx = ctx.clone();
            cmd_ctx.args = resolved.args.clone();
            cmd_ctx.flags = resolved.flags.clone();
            match self.registry.get(&resolved.name) {
                Some(handler) => handler.execute(&cmd_ctx),
                None => external::run(&resolved, &cmd_ctx),
            }
        })();

        self.metrics.record(
            &resolved.name,
            start.elapsed().as_micros() as u64,
            outcome.is_ok(),
        );
        if let Err(e) = &outcome {
            debug!(name = %resolved.name, error = %e, "command failed");
        }
        outcome
    }

    /// Submit a line to the worker pool; the returned handle yields the
    /// command's result.
    pub fn execute_async(
        self: &Arc<Self>,
        line: &str,
        ctx: &CommandContext,
        deadline: Option<Duration>,
    ) -> Result<TaskHandle<Result<Value, NexusError>>, NexusError> {
        let engine = Arc::clone(self);
        let line = line.to_string();
        let mut task_ctx = ctx.clone();
        if let Some(d) = deadline {
            task_ctx.cancel = Some(CancelToken::with_deadline(d));
        }
        self.pool.submit(move || engine.execute(&line, &task_ctx))
    }

    fn spawn_background(
        &self,
        command: ParsedCommand,
        ctx: &CommandContext,
    ) -> Result<Value, NexusError> {
        // Fire and forget: the result is logged, not returned.
        let registry = self.registry.clone();
        let caps = Arc::clone(&self.caps);
        let state = Arc::clone(&self.state);
        let task_ctx = ctx.clone();
        let metrics_name = command.name.clone();
        let returned_name = command.name.clone();
        self.pool.submit(move || {
            let resolved = match aliases::resolve(&state, &command) {
                Ok(r) => r,
                Err(e) => {
                    warn!(name = %command.name, error = %e, "background command failed");
                    return;
                }
            };
            let run = || -> Result<Value, NexusError> {
                caps.require("command:execute", &resolved.name)?;
                let mut cmd_ctx = task_ctx.clone();
                cmd_ctx.args = resolved.args.clone();
                cmd_ctx.flags = resolved.flags.clone();
                match registry.get(&resolved.name) {
                    Some(handler) => handler.execute(&cmd_ctx),
                    None => external::run(&resolved, &cmd_ctx),
                }
            };
            if let Err(e) = run() {
                warn!(name = %metrics_name, error = %e, "background command failed");
            }
        })?;
        Ok(map_value(vec![
            ("background", Value::bool(true)),
            ("command", Value::string(returned_name)),
        ]))
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::PolicyName;
    use std::collections::BTreeMap;

    fn host_env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Ok(path) = std::env::var("PATH") {
            env.insert("PATH".to_string(), path);
        }
        env
    }

    fn engine_with_policy(policy: Option<PolicyName>) -> Arc<ExecutionEngine> {
        let caps = Arc::new(CapabilityStore::new(1000, None));
        if let Some(p) = policy {
            caps.apply_policy(p);
        }
        let bridge = Arc::new(ObjectBridge::new(Arc::clone(&caps), 16 * 1024 * 1024));
        let state = Arc::new(ShellState::new(
            std::env::temp_dir().to_string_lossy().into_owned(),
            host_env(),
        ));
        let registry = CommandRegistry::new();
        builtins::register_core(&registry, Arc::clone(&state)).unwrap();
        let mut parser = Parser::new();
        parser.register_command_names(registry.names());
        Arc::new(ExecutionEngine::new(
            Arc::new(parser),
            registry,
            caps,
            bridge,
            state,
            WorkerPool::new(2),
        ))
    }

    fn engine() -> Arc<ExecutionEngine> {
        engine_with_policy(Some(PolicyName::Developer))
    }

    #[test]
    fn builtin_dispatch() {
        let e = engine();
        let ctx = e.make_context();
        let v = e.execute("pwd", &ctx).unwrap();
        assert_eq!(v.as_str(), Some(ctx.cwd.as_str()));
    }

    #[test]
    fn external_pipeline_echo_wc() {
        let e = engine();
        let ctx = e.make_context();
        let v = e.execute("echo hello | wc -c", &ctx).unwrap();
        assert_eq!(v.get("code").and_then(Value::as_int), Some(0));
        assert_eq!(v.get("stdout").and_then(|s| s.as_str()), Some("6\n"));
        assert_eq!(v.get("success").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn one_stage_pipeline_equals_single_execution() {
        let e = engine();
        let ctx = e.make_context();
        let alone = e.execute("pwd", &ctx).unwrap();
        let mut cmd = ParsedCommand::new("pwd");
        cmd.raw = "pwd".into();
        let piped = e.execute_pipeline(std::slice::from_ref(&cmd), &ctx).unwrap();
        assert_eq!(alone.kind, piped.kind);
    }

    #[test]
    fn scripted_line_routes_to_evaluator() {
        let e = engine();
        let ctx = e.make_context();
        let v = e.execute("utils.formatBytes(2048)", &ctx).unwrap();
        assert_eq!(v.as_str(), Some("2.0 KB"));
    }

    #[test]
    fn default_deny_blocks_dispatch() {
        let e = engine_with_policy(None);
        let ctx = e.make_context();
        let err = e.execute("pwd", &ctx).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::PermissionDenied);
    }

    #[test]
    fn alias_resolution_applies_and_cycles_error() {
        let e = engine();
        let ctx = e.make_context();
        e.execute("alias p pwd", &ctx).unwrap();
        let v = e.execute("p", &ctx).unwrap();
        assert_eq!(v.as_str(), Some(ctx.cwd.as_str()));

        e.execute("alias x y", &ctx).unwrap();
        e.execute("alias y x", &ctx).unwrap();
        let err = e.execute("x", &ctx).unwrap_err();
        assert!(err.to_string().contains("alias cycle"));
    }

    #[test]
    fn failing_stage_aborts_pipeline() {
        let e = engine();
        let ctx = e.make_context();
        let err = e
            .execute("no-such-binary-77ab | wc -c", &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::NotFound);
    }

    #[test]
    fn async_execution_returns_future_like_handle() {
        let e = engine();
        let ctx = e.make_context();
        let handle = e.execute_async("pwd", &ctx, None).unwrap();
        let v = handle.join().unwrap().unwrap();
        assert_eq!(v.as_str(), Some(ctx.cwd.as_str()));
    }

    #[test]
    fn metrics_record_each_command() {
        let e = engine();
        let ctx = e.make_context();
        e.execute("pwd", &ctx).unwrap();
        e.execute("pwd", &ctx).unwrap();
        let _ = e.execute("no-such-binary-77ab", &ctx);
        // The sink aggregates on its own thread.
        std::thread::sleep(Duration::from_millis(50));
        let snap = e.metrics_snapshot();
        assert_eq!(snap.per_command["pwd"].count, 2);
        assert_eq!(snap.per_command["no-such-binary-77ab"].failures, 1);
        assert!(snap.commands_executed >= 3);
    }

    #[test]
    fn background_command_returns_marker() {
        let e = engine();
        let ctx = e.make_context();
        let v = e.execute("sleep 0 &", &ctx).unwrap();
        assert_eq!(v.get("background").and_then(Value::as_bool), Some(true));
    }

    #[test]
    fn empty_line_is_null() {
        let e = engine();
        let ctx = e.make_context();
        assert!(e.execute("   ", &ctx).unwrap().is_null());
    }
}
