// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated supervisor state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels and arming debounce timers
//! - running builds and starting / stopping the managed process
//! - handling Ctrl+C / SIGTERM
//!
//! The core is intended to be extensively tested without any Tokio,
//! channels, filesystem, or processes.

use crate::engine::debounce::Debouncer;
use crate::engine::event_handlers::{
    handle_build_finished, handle_process_exited, handle_process_start_failed,
    handle_process_started, handle_process_stopped, handle_shutdown, handle_trigger, CoreCommand,
    CoreStep, Supervision,
};
use crate::engine::{CoreOptions, RuntimeEvent};
use crate::types::{BuildSeq, ProcessInfo, SupervisorState, TriggerReason};

/// Pure core runtime state.
///
/// This owns:
/// - the debouncer
/// - the supervision state (current state, in-flight / pending builds,
///   the process believed to be live)
/// - core options
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    debouncer: Debouncer,
    supervision: Supervision,
    options: CoreOptions,
}

impl CoreRuntime {
    pub fn new(options: CoreOptions) -> Self {
        Self {
            debouncer: Debouncer::new(options.debounce),
            supervision: Supervision::default(),
            options,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.supervision.state
    }

    /// Sequence number of the build currently in flight.
    pub fn in_flight(&self) -> Option<BuildSeq> {
        self.supervision.in_flight.as_ref().map(|b| b.seq)
    }

    pub fn has_pending_build(&self) -> bool {
        self.supervision.pending.is_some()
    }

    pub fn live_process(&self) -> Option<ProcessInfo> {
        self.supervision.live
    }

    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::FileChanged(change) => {
                let generation = self.debouncer.push(change);
                CoreStep {
                    commands: vec![CoreCommand::ArmDebounce {
                        generation,
                        delay: self.debouncer.window(),
                    }],
                    keep_running: true,
                }
            }
            RuntimeEvent::DebounceElapsed { generation } => match self.debouncer.flush(generation) {
                Some(paths) => handle_trigger(
                    &mut self.supervision,
                    &self.options,
                    paths,
                    TriggerReason::FileChange,
                ),
                None => CoreStep {
                    commands: Vec::new(),
                    keep_running: true,
                },
            },
            RuntimeEvent::BuildRequested { reason } => {
                handle_trigger(&mut self.supervision, &self.options, Vec::new(), reason)
            }
            RuntimeEvent::BuildFinished(result) => {
                handle_build_finished(&mut self.supervision, &self.options, result)
            }
            RuntimeEvent::ProcessStarted(info) => {
                handle_process_started(&mut self.supervision, info)
            }
            RuntimeEvent::ProcessStartFailed { seq, error } => {
                handle_process_start_failed(&mut self.supervision, seq, error)
            }
            RuntimeEvent::ProcessStopped(outcome) => handle_process_stopped(outcome),
            RuntimeEvent::ProcessExited { seq, pid, exit } => {
                handle_process_exited(&mut self.supervision, seq, pid, exit)
            }
            RuntimeEvent::WatchFailed(error) => handle_shutdown(&mut self.supervision, Some(error)),
            RuntimeEvent::ShutdownRequested => handle_shutdown(&mut self.supervision, None),
        }
    }
}
