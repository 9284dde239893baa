// src/report.rs

//! User-facing status stream.
//!
//! The core emits [`StatusUpdate`]s; a [`Reporter`] renders them. Process
//! output is forwarded through the same reporter so both end up on one
//! standard output sink. Internal diagnostics go through `tracing` on stderr.

use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{BuildError, ProcessStartError, WatchError};
use crate::types::{BuildSeq, ProcessExit, StopOutcome, SupervisorState, TriggerReason};

/// One line (or block) of status shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    BuildStarted {
        seq: BuildSeq,
        reason: TriggerReason,
        paths: Vec<PathBuf>,
    },
    /// A trigger arrived while `running` was still building.
    BuildQueued {
        running: BuildSeq,
        paths: Vec<PathBuf>,
    },
    BuildSucceeded {
        seq: BuildSeq,
        artifact: PathBuf,
        duration: Duration,
    },
    BuildFailed {
        seq: BuildSeq,
        paths: Vec<PathBuf>,
        error: BuildError,
        diagnostics: String,
    },
    /// A newer trigger superseded this build; its result has no effect.
    StaleResultDiscarded { seq: BuildSeq },
    BuildCancelled { seq: BuildSeq },
    ProcessStarted { seq: BuildSeq, pid: u32 },
    ProcessStartFailed {
        seq: BuildSeq,
        error: ProcessStartError,
    },
    ProcessExited {
        seq: BuildSeq,
        pid: u32,
        exit: ProcessExit,
    },
    ProcessStopped { outcome: StopOutcome },
    WatchFailed { error: WatchError },
    ShuttingDown,
}

/// Which stream of the managed process a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Sink for the status stream.
pub trait Reporter: Send + Sync {
    fn status(&self, update: &StatusUpdate);

    /// A line printed by the managed process started from build `seq`.
    fn process_output(&self, seq: BuildSeq, stream: Stream, line: &str);
}

/// Writes the status stream to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn status(&self, update: &StatusUpdate) {
        println!("{}", render(update));
    }

    fn process_output(&self, seq: BuildSeq, _stream: Stream, line: &str) {
        println!("[run#{seq}] {line}");
    }
}

/// Render a status update as the text printed by [`StdoutReporter`].
pub fn render(update: &StatusUpdate) -> String {
    match update {
        StatusUpdate::StateChanged { from, to } => {
            format!("[watchrun] {from} -> {to}")
        }
        StatusUpdate::BuildStarted { seq, reason, paths } => match reason {
            TriggerReason::Startup => format!("[watchrun] build #{seq} started (initial build)"),
            TriggerReason::FileChange => format!(
                "[watchrun] build #{seq} started ({} changed: {})",
                paths.len(),
                summarize_paths(paths)
            ),
        },
        StatusUpdate::BuildQueued { running, paths } => format!(
            "[watchrun] {} change(s) queued behind build #{running}: {}",
            paths.len(),
            summarize_paths(paths)
        ),
        StatusUpdate::BuildSucceeded {
            seq,
            artifact,
            duration,
        } => format!(
            "[watchrun] build #{seq} succeeded in {:.2}s -> {}",
            duration.as_secs_f64(),
            artifact.display()
        ),
        StatusUpdate::BuildFailed {
            seq,
            paths,
            error,
            diagnostics,
        } => {
            let mut out = format!("[watchrun] build #{seq} failed: {error}");
            if !paths.is_empty() {
                out.push_str(&format!("\n[watchrun] triggered by: {}", summarize_paths(paths)));
            }
            if !diagnostics.is_empty() {
                out.push('\n');
                out.push_str(diagnostics.trim_end());
            }
            out.push_str("\n[watchrun] waiting for changes");
            out
        }
        StatusUpdate::StaleResultDiscarded { seq } => {
            format!("[watchrun] build #{seq} superseded by newer changes; result discarded")
        }
        StatusUpdate::BuildCancelled { seq } => format!("[watchrun] build #{seq} cancelled"),
        StatusUpdate::ProcessStarted { seq, pid } => {
            format!("[watchrun] started build #{seq} (pid {pid})")
        }
        StatusUpdate::ProcessStartFailed { seq, error } => {
            format!("[watchrun] build #{seq} failed to start: {error}\n[watchrun] waiting for changes")
        }
        StatusUpdate::ProcessExited { seq, pid, exit } => {
            format!("[watchrun] process from build #{seq} (pid {pid}) exited: {exit}")
        }
        StatusUpdate::ProcessStopped { outcome } => match outcome {
            StopOutcome::NotRunning => "[watchrun] no process to stop".to_string(),
            StopOutcome::Graceful { pid, exit } => {
                format!("[watchrun] stopped pid {pid} ({exit})")
            }
            StopOutcome::Forced(timeout) => format!("[watchrun] warning: {timeout}"),
        },
        StatusUpdate::WatchFailed { error } => {
            format!("[watchrun] fatal: {error}; shutting down")
        }
        StatusUpdate::ShuttingDown => "[watchrun] shutting down".to_string(),
    }
}

fn summarize_paths(paths: &[PathBuf]) -> String {
    const SHOWN: usize = 3;
    let mut shown: Vec<String> = paths
        .iter()
        .take(SHOWN)
        .map(|p| p.display().to_string())
        .collect();
    if paths.len() > SHOWN {
        shown.push(format!("and {} more", paths.len() - SHOWN));
    }
    shown.join(", ")
}
