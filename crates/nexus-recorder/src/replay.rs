//! Replay: re-issue a recording's commands in order with breakpoints,
//! speed control, and divergence reporting.

use std::time::Duration;

use tracing::{debug, warn};

use nexus_types::{CommandContext, NexusError, Value};

use crate::format::RecordingFile;

/// Replay tuning.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// `1.0` replays as fast as possible; below that, a delay of
    /// `(1000/speed - 1000)` ms is inserted between commands.
    pub speed: f64,
    /// Pause before these entry indices.
    pub breakpoints: Vec<usize>,
    /// Pause before every entry.
    pub step_mode: bool,
    /// Skip entries before this index.
    pub start_from: usize,
    /// Stop at the first divergence instead of reporting and continuing.
    pub abort_on_divergence: bool,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            breakpoints: Vec::new(),
            step_mode: false,
            start_from: 0,
            abort_on_divergence: false,
        }
    }
}

/// A mismatch between a recorded outcome and the replayed one.
#[derive(Debug, Clone, PartialEq)]
pub struct Divergence {
    pub index: usize,
    pub input: String,
    pub recorded: Option<serde_json::Value>,
    pub recorded_error: Option<String>,
    pub actual: Option<serde_json::Value>,
    pub actual_error: Option<String>,
}

/// What a replay did.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub executed: usize,
    pub divergences: Vec<Divergence>,
    /// True when a pause callback or divergence policy ended the session
    /// early.
    pub aborted: bool,
}

/// Re-issue `recording`'s commands through `runner`.
///
/// `runner` receives the input line and the restored context (with
/// `in_replay` set). `on_pause` fires before breakpoint/step entries;
/// returning false aborts the session.
pub fn replay(
    recording: &RecordingFile,
    opts: &ReplayOptions,
    mut runner: impl FnMut(&str, &CommandContext) -> Result<Value, NexusError>,
    mut on_pause: impl FnMut(usize) -> bool,
) -> ReplayReport {
    let mut report = ReplayReport::default();
    let delay = if opts.speed > 0.0 && opts.speed < 1.0 {
        Some(Duration::from_millis(
            (1000.0 / opts.speed - 1000.0).round() as u64,
        ))
    } else {
        None
    };

    let mut first = true;
    for (index, entry) in recording.commands.iter().enumerate().skip(opts.start_from) {
        if opts.step_mode || opts.breakpoints.contains(&index) {
            if !on_pause(index) {
                debug!(index, "replay aborted at pause");
                report.aborted = true;
                return report;
            }
        }
        if !first {
            if let Some(d) = delay {
                std::thread::sleep(d);
            }
        }
        first = false;

        let mut ctx: CommandContext =
            serde_json::from_value(entry.context.clone()).unwrap_or_default();
        ctx.in_replay = true;

        let outcome = runner(&entry.input, &ctx);
        report.executed += 1;

        let (actual, actual_error) = match &outcome {
            Ok(value) => (Some(value.to_json()), None),
            Err(e) => (None, Some(e.user_line())),
        };
        let diverged = actual != entry.result || actual_error != entry.error;
        if diverged {
            warn!(index, input = %entry.input, "replay divergence");
            report.divergences.push(Divergence {
                index,
                input: entry.input.clone(),
                recorded: entry.result.clone(),
                recorded_error: entry.error.clone(),
                actual,
                actual_error,
            });
            if opts.abort_on_divergence {
                report.aborted = true;
                return report;
            }
        }
    }
    report
}
