// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::{BuildBackend, ProcessBackend};
use crate::report::Reporter;

use super::core::CoreRuntime;
use super::{CoreCommand, ExitReason, RuntimeEvent};

/// Drives the supervisor state machine in response to `RuntimeEvent`s and
/// delegates builds and process management to the backends.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, arming debounce timers, running builds, and starting /
/// stopping the managed process.
pub struct Runtime<B: BuildBackend, P: ProcessBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Weak so that the loop still notices when every producer is gone.
    timer_tx: mpsc::WeakSender<RuntimeEvent>,
    debounce_timer: Option<JoinHandle<()>>,
    builds: B,
    processes: P,
    reporter: Arc<dyn Reporter>,
    /// Outcomes of process starts / stops, handled before the next channel
    /// event so the core sees them in command order.
    feedback: VecDeque<RuntimeEvent>,
}

impl<B: BuildBackend, P: ProcessBackend> fmt::Debug for Runtime<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("feedback", &self.feedback)
            .finish_non_exhaustive()
    }
}

impl<B: BuildBackend, P: ProcessBackend> Runtime<B, P> {
    pub fn new(
        core: CoreRuntime,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        builds: B,
        processes: P,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            core,
            event_rx,
            timer_tx: event_tx.downgrade(),
            debounce_timer: None,
            builds,
            processes,
            reporter,
            feedback: VecDeque::new(),
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx` (and start / stop outcomes
    ///   produced by the loop itself).
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core.
    ///
    /// A closed event channel is treated like a shutdown request.
    pub async fn run(mut self) -> Result<ExitReason> {
        info!("watchrun runtime started");

        let mut exit = None;

        loop {
            let event = match self.feedback.pop_front() {
                Some(event) => event,
                None => match self.event_rx.recv().await {
                    Some(event) => event,
                    None => {
                        info!("runtime event channel closed; shutting down");
                        RuntimeEvent::ShutdownRequested
                    }
                },
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                if let Some(reason) = self.execute_command(command).await? {
                    exit = Some(reason);
                }
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        if let Some(timer) = self.debounce_timer.take() {
            timer.abort();
        }
        self.builds.shutdown().await;
        self.report_remaining_feedback();

        let reason = exit.unwrap_or(ExitReason::Shutdown { interrupted: false });
        info!(?reason, "runtime exiting");
        Ok(reason)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<Option<ExitReason>> {
        match command {
            CoreCommand::ArmDebounce { generation, delay } => {
                self.arm_debounce(generation, delay);
            }
            CoreCommand::StartBuild(job) => {
                debug!(seq = job.seq, paths = ?job.paths, "dispatching build");
                self.builds.start_build(job).await?;
            }
            CoreCommand::CancelBuild { seq } => {
                self.builds.cancel_build(seq).await;
            }
            CoreCommand::StopProcess => {
                let outcome = self.processes.stop().await;
                self.feedback.push_back(RuntimeEvent::ProcessStopped(outcome));
            }
            CoreCommand::StartProcess { seq, artifact } => {
                let event = match self.processes.start(seq, artifact).await {
                    Ok(info) => RuntimeEvent::ProcessStarted(info),
                    Err(error) => RuntimeEvent::ProcessStartFailed { seq, error },
                };
                self.feedback.push_back(event);
            }
            CoreCommand::Report(update) => {
                self.reporter.status(&update);
            }
            CoreCommand::Exit(reason) => {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    /// Replace the pending debounce timer. Only the newest generation can
    /// flush, so the old timer is simply dropped.
    fn arm_debounce(&mut self, generation: u64, delay: std::time::Duration) {
        if let Some(prev) = self.debounce_timer.take() {
            prev.abort();
        }
        let Some(tx) = self.timer_tx.upgrade() else {
            debug!(generation, "event channel closed; not arming debounce timer");
            return;
        };
        self.debounce_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(RuntimeEvent::DebounceElapsed { generation }).await;
        }));
    }

    /// Stop outcomes produced during shutdown still reach the status stream.
    fn report_remaining_feedback(&mut self) {
        while let Some(event) = self.feedback.pop_front() {
            let step = self.core.step(event);
            for command in step.commands {
                if let CoreCommand::Report(update) = command {
                    self.reporter.status(&update);
                }
            }
        }
    }
}
