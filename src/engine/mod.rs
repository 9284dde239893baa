// src/engine/mod.rs

//! Orchestration engine for watchrun.
//!
//! This module ties together:
//! - the debouncer (quiet-window coalescing of change events)
//! - the supervisor state machine (idle / building / starting / running / failed)
//! - the main runtime event loop that reacts to:
//!   - file changes and debounce timers
//!   - build results
//!   - process start / exit / stop outcomes
//!   - shutdown signals and fatal watch errors
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::config::ConfigFile;
use crate::errors::{ProcessStartError, WatchError};
use crate::types::{
    BuildResult, BuildSeq, ChangeEvent, ProcessExit, ProcessInfo, StopOutcome, TriggerReason,
    TriggerWhileBuildingBehaviour,
};

/// Options used by the core.
#[derive(Debug, Clone, Copy)]
pub struct CoreOptions {
    pub while_building: TriggerWhileBuildingBehaviour,
    /// Leave the previous instance running until the next artifact is ready.
    pub keep_running_during_build: bool,
    pub debounce: Duration,
}

impl CoreOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            while_building: cfg.build.while_building,
            keep_running_during_build: cfg.process.keep_running_during_build,
            debounce: cfg.watch.debounce,
        }
    }
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            while_building: TriggerWhileBuildingBehaviour::Queue,
            keep_running_during_build: false,
            debounce: Duration::from_millis(200),
        }
    }
}

/// Events flowing into the runtime from the watcher, the build runner, the
/// process supervisor and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A filtered change from the watcher.
    FileChanged(ChangeEvent),
    /// The debounce timer armed for `generation` fired.
    DebounceElapsed { generation: u64 },
    /// Build without waiting for a change (initial build).
    BuildRequested { reason: TriggerReason },
    /// A build finished, failed or was cancelled.
    BuildFinished(BuildResult),
    ProcessStarted(ProcessInfo),
    ProcessStartFailed {
        seq: BuildSeq,
        error: ProcessStartError,
    },
    /// Outcome of a stop the core asked for.
    ProcessStopped(StopOutcome),
    /// The managed process exited on its own.
    ProcessExited {
        seq: BuildSeq,
        pid: u32,
        exit: ProcessExit,
    },
    /// The watcher hit a fatal error and stopped.
    WatchFailed(WatchError),
    /// Graceful shutdown requested (e.g. Ctrl-C or SIGTERM).
    ShutdownRequested,
}

/// Why the runtime loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// User-initiated shutdown. `interrupted` is set when a build or a
    /// process start was cut short.
    Shutdown { interrupted: bool },
    WatchFailed(WatchError),
}

impl ExitReason {
    /// Process exit code for a clean shutdown; `None` for fatal reasons that
    /// surface as errors instead.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExitReason::Shutdown { interrupted: false } => Some(0),
            ExitReason::Shutdown { interrupted: true } => Some(130),
            ExitReason::WatchFailed(_) => None,
        }
    }
}

pub mod core;
pub mod debounce;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use debounce::Debouncer;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
