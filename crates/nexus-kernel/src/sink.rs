//! Adapter between the engine's recording hooks and the recorder.

use std::sync::Arc;

use nexus_engine::RecorderSink;
use nexus_recorder::Recorder;
use nexus_types::{CommandContext, NexusError, Value};

/// Forwards the engine's record hooks to the [`Recorder`].
pub struct RecorderBridge {
    recorder: Arc<Recorder>,
}

impl RecorderBridge {
    pub fn new(recorder: Arc<Recorder>) -> Self {
        Self { recorder }
    }
}

impl RecorderSink for RecorderBridge {
    fn record_command(&self, input: &str, ctx: &CommandContext) -> Option<u64> {
        self.recorder.record_command(input, ctx)
    }

    fn record_result(
        &self,
        seq: u64,
        result: &Result<Value, NexusError>,
        latency_us: u64,
    ) {
        self.recorder.record_result(seq, result, latency_us);
    }
}
