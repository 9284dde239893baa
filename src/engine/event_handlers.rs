// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::engine::{CoreOptions, ExitReason};
use crate::errors::{ProcessStartError, WatchError};
use crate::report::StatusUpdate;
use crate::types::{
    BuildJob, BuildOutcome, BuildResult, BuildSeq, ProcessExit, ProcessInfo, StopOutcome,
    SupervisorState, TriggerReason, TriggerWhileBuildingBehaviour,
};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCommand {
    /// Arm a timer that feeds back `DebounceElapsed { generation }`.
    ArmDebounce { generation: u64, delay: Duration },
    StartBuild(BuildJob),
    /// Kill the in-flight build; its result arrives as `Cancelled`.
    CancelBuild { seq: BuildSeq },
    /// Gracefully stop the managed process.
    StopProcess,
    /// Launch the artifact produced by build `seq`.
    StartProcess { seq: BuildSeq, artifact: PathBuf },
    Report(StatusUpdate),
    Exit(ExitReason),
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn proceed(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Build currently owned by the build runner.
#[derive(Debug, Clone)]
pub struct InFlightBuild {
    pub seq: BuildSeq,
    pub paths: Vec<PathBuf>,
    pub cancel_requested: bool,
}

/// Mutable supervision state the handlers operate on.
#[derive(Debug)]
pub struct Supervision {
    pub state: SupervisorState,
    next_seq: BuildSeq,
    pub in_flight: Option<InFlightBuild>,
    /// Union of triggers that arrived while a build was in flight.
    pub pending: Option<(BTreeSet<PathBuf>, TriggerReason)>,
    /// The managed process the core believes is alive.
    pub live: Option<ProcessInfo>,
    /// Build whose artifact is being launched.
    pub starting: Option<BuildSeq>,
}

impl Default for Supervision {
    fn default() -> Self {
        Self {
            state: SupervisorState::Idle,
            next_seq: 1,
            in_flight: None,
            pending: None,
            live: None,
            starting: None,
        }
    }
}

impl Supervision {
    fn transition(&mut self, to: SupervisorState, commands: &mut Vec<CoreCommand>) {
        let from = self.state;
        if from == to {
            return;
        }
        info!(%from, %to, "state transition");
        self.state = to;
        commands.push(CoreCommand::Report(StatusUpdate::StateChanged { from, to }));
    }

    fn allocate_seq(&mut self) -> BuildSeq {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn stop_live(&mut self, commands: &mut Vec<CoreCommand>) {
        if let Some(info) = self.live.take() {
            debug!(seq = info.seq, pid = info.pid, "stopping managed process");
            commands.push(CoreCommand::StopProcess);
        }
    }

    fn start_build(
        &mut self,
        options: &CoreOptions,
        paths: Vec<PathBuf>,
        reason: TriggerReason,
        commands: &mut Vec<CoreCommand>,
    ) {
        self.starting = None;
        if !options.keep_running_during_build {
            self.stop_live(commands);
        }

        let seq = self.allocate_seq();
        info!(seq, ?reason, changed = paths.len(), "starting build");

        self.in_flight = Some(InFlightBuild {
            seq,
            paths: paths.clone(),
            cancel_requested: false,
        });
        self.transition(SupervisorState::Building, commands);
        commands.push(CoreCommand::Report(StatusUpdate::BuildStarted {
            seq,
            reason,
            paths: paths.clone(),
        }));
        commands.push(CoreCommand::StartBuild(BuildJob {
            seq,
            started_at: Instant::now(),
            paths,
            reason,
        }));
    }

    fn take_pending(&mut self) -> Option<(Vec<PathBuf>, TriggerReason)> {
        self.pending
            .take()
            .map(|(paths, reason)| (paths.into_iter().collect(), reason))
    }
}

/// Handle a coalesced trigger (debounce flush or startup request).
///
/// - No build in flight: start one right away.
/// - Build in flight: merge into the pending trigger. In `cancel` mode the
///   in-flight build is cancelled once; the pending build starts when the
///   cancelled result arrives.
pub fn handle_trigger(
    sup: &mut Supervision,
    options: &CoreOptions,
    paths: Vec<PathBuf>,
    reason: TriggerReason,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(running) = sup.in_flight.as_ref().map(|b| b.seq) else {
        sup.start_build(options, paths, reason, &mut commands);
        return CoreStep::proceed(commands);
    };

    let pending = sup
        .pending
        .get_or_insert_with(|| (BTreeSet::new(), reason));
    pending.0.extend(paths.iter().cloned());
    if reason == TriggerReason::FileChange {
        pending.1 = reason;
    }

    debug!(running, queued = paths.len(), "build in flight; trigger queued");
    commands.push(CoreCommand::Report(StatusUpdate::BuildQueued { running, paths }));

    if options.while_building == TriggerWhileBuildingBehaviour::Cancel {
        if let Some(in_flight) = sup.in_flight.as_mut().filter(|b| !b.cancel_requested) {
            in_flight.cancel_requested = true;
            info!(seq = running, "cancelling superseded build");
            commands.push(CoreCommand::CancelBuild { seq: running });
        }
    }

    CoreStep::proceed(commands)
}

/// Handle a finished build.
///
/// Results for anything but the in-flight build are dropped. If a newer
/// trigger is pending the result is stale and the pending build starts.
pub fn handle_build_finished(
    sup: &mut Supervision,
    options: &CoreOptions,
    result: BuildResult,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(finished) = sup.in_flight.take_if(|b| b.seq == result.seq) else {
        debug!(
            seq = result.seq,
            in_flight = ?sup.in_flight.as_ref().map(|b| b.seq),
            "ignoring result of unknown build"
        );
        return CoreStep::proceed(commands);
    };

    if let Some((paths, reason)) = sup.take_pending() {
        let update = if matches!(result.outcome, BuildOutcome::Cancelled) {
            StatusUpdate::BuildCancelled { seq: result.seq }
        } else {
            StatusUpdate::StaleResultDiscarded { seq: result.seq }
        };
        info!(seq = result.seq, "build superseded; starting pending build");
        commands.push(CoreCommand::Report(update));
        sup.start_build(options, paths, reason, &mut commands);
        return CoreStep::proceed(commands);
    }

    match result.outcome {
        BuildOutcome::Succeeded { ref artifact } => {
            let artifact = artifact.clone();
            info!(seq = result.seq, ?artifact, "build succeeded");
            commands.push(CoreCommand::Report(StatusUpdate::BuildSucceeded {
                seq: result.seq,
                artifact: artifact.clone(),
                duration: result.duration,
            }));
            sup.transition(SupervisorState::Starting, &mut commands);
            sup.stop_live(&mut commands);
            sup.starting = Some(result.seq);
            commands.push(CoreCommand::StartProcess {
                seq: result.seq,
                artifact,
            });
        }
        BuildOutcome::Failed { ref error } => {
            warn!(seq = result.seq, %error, "build failed");
            commands.push(CoreCommand::Report(StatusUpdate::BuildFailed {
                seq: result.seq,
                paths: finished.paths,
                error: error.clone(),
                diagnostics: result.diagnostics().to_string(),
            }));
            sup.transition(SupervisorState::Failed, &mut commands);
        }
        BuildOutcome::Cancelled => {
            commands.push(CoreCommand::Report(StatusUpdate::BuildCancelled {
                seq: result.seq,
            }));
            let to = if sup.live.is_some() {
                SupervisorState::Running
            } else {
                SupervisorState::Idle
            };
            sup.transition(to, &mut commands);
        }
    }

    CoreStep::proceed(commands)
}

/// The supervisor confirmed the process is live.
pub fn handle_process_started(sup: &mut Supervision, info: ProcessInfo) -> CoreStep {
    let mut commands = Vec::new();

    if sup.starting != Some(info.seq) {
        // Launched for a build that has since been superseded.
        warn!(seq = info.seq, pid = info.pid, "stale process came up; stopping it");
        commands.push(CoreCommand::StopProcess);
        return CoreStep::proceed(commands);
    }

    sup.starting = None;
    sup.live = Some(info);
    commands.push(CoreCommand::Report(StatusUpdate::ProcessStarted {
        seq: info.seq,
        pid: info.pid,
    }));
    sup.transition(SupervisorState::Running, &mut commands);
    CoreStep::proceed(commands)
}

pub fn handle_process_start_failed(
    sup: &mut Supervision,
    seq: BuildSeq,
    error: ProcessStartError,
) -> CoreStep {
    let mut commands = Vec::new();

    if sup.starting != Some(seq) {
        debug!(seq, %error, "ignoring start failure of superseded build");
        return CoreStep::proceed(commands);
    }

    sup.starting = None;
    warn!(seq, %error, "process failed to start");
    commands.push(CoreCommand::Report(StatusUpdate::ProcessStartFailed { seq, error }));
    sup.transition(SupervisorState::Failed, &mut commands);
    CoreStep::proceed(commands)
}

/// The managed process exited without being asked to.
pub fn handle_process_exited(
    sup: &mut Supervision,
    seq: BuildSeq,
    pid: u32,
    exit: ProcessExit,
) -> CoreStep {
    let mut commands = Vec::new();

    if sup.live.map(|l| l.pid) != Some(pid) {
        debug!(seq, pid, %exit, "exit of a process that is no longer tracked");
        return CoreStep::proceed(commands);
    }

    sup.live = None;
    info!(seq, pid, %exit, "managed process exited");
    commands.push(CoreCommand::Report(StatusUpdate::ProcessExited { seq, pid, exit }));

    // While a build is in flight the exit is only reported; the build result
    // decides the next state.
    if sup.state == SupervisorState::Running {
        let to = if exit.success() {
            SupervisorState::Idle
        } else {
            SupervisorState::Failed
        };
        sup.transition(to, &mut commands);
    }

    CoreStep::proceed(commands)
}

pub fn handle_process_stopped(outcome: StopOutcome) -> CoreStep {
    let mut commands = Vec::new();
    match &outcome {
        StopOutcome::NotRunning => return CoreStep::proceed(commands),
        StopOutcome::Graceful { pid, exit } => debug!(pid, %exit, "process stopped"),
        StopOutcome::Forced(timeout) => warn!(%timeout, "process force-killed"),
    }
    commands.push(CoreCommand::Report(StatusUpdate::ProcessStopped { outcome }));
    CoreStep::proceed(commands)
}

/// Shutdown signal or fatal watch error: cancel, stop, exit.
pub fn handle_shutdown(sup: &mut Supervision, failure: Option<WatchError>) -> CoreStep {
    let mut commands = Vec::new();

    let interrupted = matches!(
        sup.state,
        SupervisorState::Building | SupervisorState::Starting
    );

    let reason = match failure {
        Some(error) => {
            commands.push(CoreCommand::Report(StatusUpdate::WatchFailed {
                error: error.clone(),
            }));
            ExitReason::WatchFailed(error)
        }
        None => {
            commands.push(CoreCommand::Report(StatusUpdate::ShuttingDown));
            ExitReason::Shutdown { interrupted }
        }
    };

    info!(state = %sup.state, ?reason, "shutting down");

    sup.pending = None;
    if let Some(in_flight) = sup.in_flight.take() {
        commands.push(CoreCommand::CancelBuild { seq: in_flight.seq });
    }
    if sup.starting.take().is_some() {
        // The start already resolved inside the shell; whatever came up is
        // the supervisor's single slot and the stop below covers it.
        commands.push(CoreCommand::StopProcess);
        sup.live = None;
    } else {
        sup.stop_live(&mut commands);
    }
    commands.push(CoreCommand::Exit(reason));

    CoreStep {
        commands,
        keep_running: false,
    }
}
