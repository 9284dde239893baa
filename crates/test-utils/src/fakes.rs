//! Fake backends and a recording reporter for runtime tests.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use watchrun::engine::RuntimeEvent;
use watchrun::errors::{BuildError, ProcessStartError, Result, WatchrunError};
use watchrun::exec::{BuildBackend, ProcessBackend};
use watchrun::report::{Reporter, StatusUpdate, Stream};
use watchrun::types::{
    BuildJob, BuildOutcome, BuildOutput, BuildResult, BuildSeq, ProcessExit, ProcessInfo,
    StopOutcome, SupervisorState,
};

/// What the fake build backend does with the next started job.
#[derive(Debug, Clone)]
pub enum FakeBuild {
    /// Finish immediately with artifact `app-{seq}`.
    Succeed,
    /// Finish immediately with a non-zero exit.
    Fail { stderr: String, code: i32 },
    /// Keep running until [`FakeBuilds::finish`] or a cancel.
    Hold,
}

#[derive(Debug, Default)]
struct BuildState {
    started: Vec<BuildJob>,
    cancelled: Vec<BuildSeq>,
    held: Vec<BuildSeq>,
    script: VecDeque<FakeBuild>,
}

/// A fake build backend that:
/// - records which jobs were started and cancelled
/// - reports `BuildFinished` according to a script (default: succeed).
pub struct FakeBuildBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    state: Arc<Mutex<BuildState>>,
}

/// Test-side view of a [`FakeBuildBackend`].
#[derive(Clone)]
pub struct FakeBuilds {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    state: Arc<Mutex<BuildState>>,
}

impl FakeBuildBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> (Self, FakeBuilds) {
        let state = Arc::new(Mutex::new(BuildState::default()));
        let probe = FakeBuilds {
            runtime_tx: runtime_tx.clone(),
            state: Arc::clone(&state),
        };
        (Self { runtime_tx, state }, probe)
    }
}

pub fn artifact_for(seq: BuildSeq) -> PathBuf {
    PathBuf::from(format!("app-{seq}"))
}

pub fn build_result(seq: BuildSeq, outcome: BuildOutcome, stderr: &str) -> BuildResult {
    BuildResult {
        seq,
        outcome,
        output: BuildOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
        },
        duration: Duration::from_millis(1),
    }
}

async fn send(tx: &mpsc::Sender<RuntimeEvent>, event: RuntimeEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|e| WatchrunError::Other(anyhow::anyhow!("runtime channel closed: {e}")))
}

impl BuildBackend for FakeBuildBackend {
    fn start_build(&mut self, job: BuildJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let seq = job.seq;
            let action = {
                let mut guard = state.lock().unwrap();
                guard.started.push(job);
                let action = guard.script.pop_front().unwrap_or(FakeBuild::Succeed);
                if matches!(action, FakeBuild::Hold) {
                    guard.held.push(seq);
                }
                action
            };

            let result = match action {
                FakeBuild::Succeed => build_result(
                    seq,
                    BuildOutcome::Succeeded {
                        artifact: artifact_for(seq),
                    },
                    "",
                ),
                FakeBuild::Fail { stderr, code } => build_result(
                    seq,
                    BuildOutcome::Failed {
                        error: BuildError::NonZeroExit(code),
                    },
                    &stderr,
                ),
                FakeBuild::Hold => return Ok(()),
            };
            send(&tx, RuntimeEvent::BuildFinished(result)).await
        })
    }

    fn cancel_build(&mut self, seq: BuildSeq) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let was_held = {
                let mut guard = state.lock().unwrap();
                guard.cancelled.push(seq);
                let before = guard.held.len();
                guard.held.retain(|s| *s != seq);
                guard.held.len() != before
            };
            if was_held {
                let _ = send(
                    &tx,
                    RuntimeEvent::BuildFinished(build_result(seq, BuildOutcome::Cancelled, "")),
                )
                .await;
            }
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            state.lock().unwrap().held.clear();
        })
    }
}

impl FakeBuilds {
    /// Queue behaviour for the next started builds, in order.
    pub fn script(&self, actions: impl IntoIterator<Item = FakeBuild>) {
        self.state.lock().unwrap().script.extend(actions);
    }

    pub fn started(&self) -> Vec<BuildSeq> {
        self.state.lock().unwrap().started.iter().map(|j| j.seq).collect()
    }

    pub fn started_jobs(&self) -> Vec<BuildJob> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn cancelled(&self) -> Vec<BuildSeq> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn held(&self) -> Vec<BuildSeq> {
        self.state.lock().unwrap().held.clone()
    }

    /// Complete a held build successfully.
    pub async fn finish_success(&self, seq: BuildSeq) {
        self.finish(
            seq,
            BuildOutcome::Succeeded {
                artifact: artifact_for(seq),
            },
            "",
        )
        .await;
    }

    /// Complete a held build with an arbitrary outcome.
    pub async fn finish(&self, seq: BuildSeq, outcome: BuildOutcome, stderr: &str) {
        self.state.lock().unwrap().held.retain(|s| *s != seq);
        send(
            &self.runtime_tx,
            RuntimeEvent::BuildFinished(build_result(seq, outcome, stderr)),
        )
        .await
        .expect("runtime channel open");
    }
}

#[derive(Debug, Default)]
struct ProcessState {
    live: Option<ProcessInfo>,
    next_pid: u32,
    started: Vec<(BuildSeq, PathBuf)>,
    stops: usize,
    /// Starts requested while another process was still live.
    overlapping_starts: usize,
    fail_next_start: bool,
}

/// A fake process backend: hands out fake pids and records every
/// start / stop.
pub struct FakeProcessBackend {
    state: Arc<Mutex<ProcessState>>,
}

/// Test-side view of a [`FakeProcessBackend`].
#[derive(Clone)]
pub struct FakeProcesses {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    state: Arc<Mutex<ProcessState>>,
}

impl FakeProcessBackend {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> (Self, FakeProcesses) {
        let state = Arc::new(Mutex::new(ProcessState {
            next_pid: 1000,
            ..ProcessState::default()
        }));
        let probe = FakeProcesses {
            runtime_tx,
            state: Arc::clone(&state),
        };
        (Self { state }, probe)
    }
}

impl ProcessBackend for FakeProcessBackend {
    fn start(
        &mut self,
        seq: BuildSeq,
        artifact: PathBuf,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<ProcessInfo, ProcessStartError>> + Send + '_>>
    {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.lock().unwrap();
            if guard.live.take().is_some() {
                guard.overlapping_starts += 1;
                guard.stops += 1;
            }
            guard.started.push((seq, artifact.clone()));

            if std::mem::take(&mut guard.fail_next_start) {
                return Err(ProcessStartError::ExitedDuringStartup {
                    artifact,
                    exit: ProcessExit {
                        code: Some(1),
                        signal: None,
                    },
                });
            }

            guard.next_pid += 1;
            let info = ProcessInfo {
                seq,
                pid: guard.next_pid,
            };
            guard.live = Some(info);
            Ok(info)
        })
    }

    fn stop(&mut self) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + '_>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.lock().unwrap();
            match guard.live.take() {
                Some(info) => {
                    guard.stops += 1;
                    StopOutcome::Graceful {
                        pid: info.pid,
                        exit: ProcessExit {
                            code: None,
                            signal: Some(15),
                        },
                    }
                }
                None => StopOutcome::NotRunning,
            }
        })
    }
}

impl FakeProcesses {
    pub fn live(&self) -> Option<ProcessInfo> {
        self.state.lock().unwrap().live
    }

    /// Artifacts started so far, in order.
    pub fn started(&self) -> Vec<(BuildSeq, PathBuf)> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn overlapping_starts(&self) -> usize {
        self.state.lock().unwrap().overlapping_starts
    }

    pub fn fail_next_start(&self) {
        self.state.lock().unwrap().fail_next_start = true;
    }

    /// Make the live process exit on its own with `code`.
    pub async fn exit_live(&self, code: i32) {
        let info = self
            .state
            .lock()
            .unwrap()
            .live
            .take()
            .expect("a live process to exit");
        send(
            &self.runtime_tx,
            RuntimeEvent::ProcessExited {
                seq: info.seq,
                pid: info.pid,
                exit: ProcessExit {
                    code: Some(code),
                    signal: None,
                },
            },
        )
        .await
        .expect("runtime channel open");
    }
}

/// Reporter that keeps everything it is given.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    updates: Mutex<Vec<StatusUpdate>>,
    output: Mutex<Vec<(BuildSeq, Stream, String)>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Target states of every reported transition, in order.
    pub fn states(&self) -> Vec<SupervisorState> {
        self.updates()
            .into_iter()
            .filter_map(|u| match u {
                StatusUpdate::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn output(&self) -> Vec<(BuildSeq, Stream, String)> {
        self.output.lock().unwrap().clone()
    }

    pub fn output_lines(&self) -> Vec<String> {
        self.output().into_iter().map(|(_, _, line)| line).collect()
    }
}

impl Reporter for RecordingReporter {
    fn status(&self, update: &StatusUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }

    fn process_output(&self, seq: BuildSeq, stream: Stream, line: &str) {
        self.output
            .lock()
            .unwrap()
            .push((seq, stream, line.to_string()));
    }
}
