//! The kernel: owns every core component, wires them together, and exposes
//! the shell's operational surface (execute, transactions, recording,
//! completion, metrics).
//!
//! Initialisation order is fixed: worker pool, capability store, bridge,
//! parser, engine, transaction manager, recorder. Shutdown runs in
//! reverse. Double init and double shutdown are no-ops.

mod sink;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use nexus_bridge::ObjectBridge;
use nexus_caps::{AuditQuery, AuditRecord, AuditWriter, CapabilityStore};
use nexus_engine::{builtins, CommandRegistry, ExecutionEngine, WorkerPool};
use nexus_parser::Parser;
use nexus_recorder::{Recorder, RecordingFile, ReplayOptions, ReplayReport};
use nexus_txn::TransactionManager;
use nexus_types::config::DEFAULT_AUDIT_CAPACITY;
use nexus_types::{CommandContext, NexusError, ShellConfig, ShellState, Value};

pub use nexus_engine::MetricsSnapshot;

/// Top-level metrics published by the kernel.
#[derive(Debug, Clone, Default)]
pub struct KernelMetrics {
    pub commands_executed: u64,
    pub total_execution_time_us: u64,
    pub failures: u64,
    pub memory_usage_bytes: u64,
}

/// The assembled shell core.
pub struct Kernel {
    config: ShellConfig,
    state: Arc<ShellState>,
    caps: Arc<CapabilityStore>,
    bridge: Arc<ObjectBridge>,
    engine: Arc<ExecutionEngine>,
    pool: Arc<WorkerPool>,
    txn: Arc<TransactionManager>,
    recorder: Arc<Recorder>,
    running: AtomicBool,
}

impl Kernel {
    /// Build and wire all components from a configuration.
    pub fn init(config: ShellConfig) -> Result<Self, NexusError> {
        Self::init_with_state(config, Arc::new(ShellState::from_host()))
    }

    /// As [`init`](Self::init), with an explicit starting state (used by
    /// tests and embedders).
    pub fn init_with_state(
        config: ShellConfig,
        state: Arc<ShellState>,
    ) -> Result<Self, NexusError> {
        let pool = WorkerPool::new(config.shell.thread_pool_size);

        let audit_writer = if config.security.audit_logging {
            let path = Path::new(&state.cwd()).join(".nexus").join("audit.log");
            match AuditWriter::spawn(&path) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "audit log disabled");
                    None
                }
            }
        } else {
            None
        };
        let caps = Arc::new(CapabilityStore::new(DEFAULT_AUDIT_CAPACITY, audit_writer));
        caps.apply_policy(config.effective_policy());
        for grant in &config.security.capabilities {
            caps.grant(grant, None);
        }

        let bridge = Arc::new(ObjectBridge::new(
            Arc::clone(&caps),
            config.shell.max_memory,
        ));

        let registry = CommandRegistry::new();
        builtins::register_core(&registry, Arc::clone(&state))?;

        let mut parser = Parser::new();
        parser.register_command_names(registry.names());
        let parser = Arc::new(parser);

        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&parser),
            registry,
            Arc::clone(&caps),
            Arc::clone(&bridge),
            Arc::clone(&state),
            Arc::clone(&pool),
        ));

        let txn = Arc::new(TransactionManager::new(Arc::clone(&state)));
        let recorder = Arc::new(Recorder::new());
        engine.set_recorder(Some(Arc::new(sink::RecorderBridge::new(Arc::clone(
            &recorder,
        )))));

        info!(
            threads = pool.thread_count(),
            policy = config.effective_policy().as_str(),
            "kernel initialised"
        );

        Ok(Self {
            config,
            state,
            caps,
            bridge,
            engine,
            pool,
            txn,
            recorder,
            running: AtomicBool::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop accepting work and tear down components in reverse init order.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.recorder.is_recording() {
            if let Err(e) = self.stop_recording() {
                warn!(error = %e, "failed to finalise recording during shutdown");
            }
        }
        self.engine.set_recorder(None);
        self.pool.shutdown();
        info!("kernel shutdown complete");
    }

    /// Execute one input line against the current shell state. A failure
    /// inside an open transaction rolls that transaction back before the
    /// error propagates.
    pub fn execute_line(&self, line: &str) -> Result<Value, NexusError> {
        if !self.is_running() {
            return Err(NexusError::Cancelled("kernel is shut down".to_string()));
        }
        let ctx = self.engine.make_context();
        let result = self.engine.execute(line, &ctx);
        if result.is_err() {
            if let Some(id) = self.txn.current() {
                warn!(txn = id, "command failed inside transaction, rolling back");
                if let Err(e) = self.txn.rollback(id) {
                    warn!(error = %e, "rollback failed");
                }
            }
        }
        result
    }

    /// Execute with an explicit context (replay, embedding).
    pub fn execute_in_context(
        &self,
        line: &str,
        ctx: &CommandContext,
    ) -> Result<Value, NexusError> {
        self.engine.execute(line, ctx)
    }

    // -- transactions -----------------------------------------------------

    pub fn begin_transaction(&self) -> u64 {
        self.txn.begin()
    }

    pub fn commit_transaction(&self, id: u64) -> Result<(), NexusError> {
        self.txn.commit(id)
    }

    pub fn rollback_transaction(&self, id: u64) -> Result<(), NexusError> {
        self.txn.rollback(id)
    }

    /// Run several lines atomically.
    pub fn execute_transaction(
        &self,
        commands: &[String],
        on_rollback: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<Vec<Value>, NexusError> {
        self.txn.execute_transaction(
            commands,
            |line| {
                let ctx = self.engine.make_context();
                self.engine.execute(line, &ctx)
            },
            on_rollback,
        )
    }

    // -- recording --------------------------------------------------------

    pub fn start_recording(&self, name: Option<&str>) -> Result<u64, NexusError> {
        self.recorder.start(name)
    }

    /// Freeze the active recording, persist it under the current cwd, and
    /// return it with its path.
    pub fn stop_recording(&self) -> Result<(RecordingFile, PathBuf), NexusError> {
        let recording = self.recorder.stop()?;
        let path = nexus_recorder::save(&recording, Path::new(&self.state.cwd()))?;
        Ok((recording, path))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Capture a labelled snapshot (metrics plus shell state) into the
    /// active recording.
    pub fn create_snapshot(
        &self,
        snapshot_type: &str,
        description: Option<&str>,
    ) -> Result<u64, NexusError> {
        let metrics = self.metrics();
        let system_state = serde_json::json!({
            "commandsExecuted": metrics.commands_executed,
            "totalExecutionTimeUs": metrics.total_execution_time_us,
            "memoryUsageBytes": metrics.memory_usage_bytes,
        });
        let snapshot = self.state.snapshot();
        let shell_state = serde_json::to_value(&snapshot)
            .map_err(|e| NexusError::Internal(format!("snapshot serialisation: {e}")))?;
        self.recorder
            .create_snapshot(snapshot_type, description, system_state, shell_state)
    }

    /// Load a recording by name (from `<cwd>/.nexus/recordings/`) or path.
    pub fn load_recording(&self, name_or_path: &str) -> Result<RecordingFile, NexusError> {
        let direct = Path::new(name_or_path);
        if direct.exists() {
            return nexus_recorder::load(direct);
        }
        let path = nexus_recorder::recording_path(Path::new(&self.state.cwd()), name_or_path);
        nexus_recorder::load(&path)
    }

    /// Replay a loaded recording through the engine. Replayed contexts get
    /// the real capability gate installed and `in_replay` set.
    pub fn replay(
        &self,
        recording: &RecordingFile,
        opts: &ReplayOptions,
        on_pause: impl FnMut(usize) -> bool,
    ) -> ReplayReport {
        let caps = Arc::clone(&self.caps);
        nexus_recorder::replay(
            recording,
            opts,
            |input, ctx| {
                let mut ctx = ctx.clone();
                ctx.caps = Arc::clone(&caps) as Arc<dyn nexus_types::CapabilityGate>;
                self.engine.execute(input, &ctx)
            },
            on_pause,
        )
    }

    // -- introspection ----------------------------------------------------

    pub fn completions(&self, line: &str, cursor: usize) -> Vec<String> {
        self.engine.parser().completions(line, cursor)
    }

    pub fn highlight(&self, line: &str) -> Vec<nexus_parser::HighlightSpan> {
        self.engine.parser().highlight(line)
    }

    pub fn audit_query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        self.caps.audit_query(query)
    }

    pub fn metrics(&self) -> KernelMetrics {
        let snap = self.engine.metrics_snapshot();
        KernelMetrics {
            commands_executed: snap.commands_executed,
            total_execution_time_us: snap.total_execution_time_us,
            failures: snap.failures,
            memory_usage_bytes: self.bridge.memory().used(),
        }
    }

    pub fn reset_metrics(&self) {
        self.engine.reset_metrics();
    }

    // -- component access -------------------------------------------------

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ShellState> {
        &self.state
    }

    pub fn caps(&self) -> &Arc<CapabilityStore> {
        &self.caps
    }

    pub fn bridge(&self) -> &Arc<ObjectBridge> {
        &self.bridge
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Did a command ask the shell to exit?
pub fn is_exit_request(value: &Value) -> bool {
    value.get("exit").and_then(Value::as_bool).unwrap_or(false)
}
