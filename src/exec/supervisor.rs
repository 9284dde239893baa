// src/exec/supervisor.rs

//! Managed process supervisor.
//!
//! Owns the single "current process" slot. Every started process gets a
//! monitor task that either reports a natural exit to the runtime or, when
//! asked to, performs the graceful stop (SIGTERM to the process group,
//! bounded wait, kill).

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::engine::RuntimeEvent;
use crate::errors::{ProcessStartError, ShutdownTimeout};
use crate::exec::backend::ProcessBackend;
use crate::exec::group;
use crate::report::{Reporter, Stream};
use crate::types::{BuildSeq, ProcessExit, ProcessInfo, StopOutcome};

/// How the managed process is launched and stopped.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Working directory of the process.
    pub root: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stop_timeout: Duration,
    pub startup_grace: Duration,
}

impl ProcessSpec {
    pub fn from_config(root: impl Into<PathBuf>, cfg: &ProcessConfig) -> Self {
        Self {
            root: root.into(),
            args: cfg.args.clone(),
            env: cfg.env.clone(),
            stop_timeout: cfg.stop_timeout,
            startup_grace: cfg.startup_grace,
        }
    }
}

type StopReply = oneshot::Sender<StopOutcome>;

struct ManagedProcess {
    info: ProcessInfo,
    stop_tx: oneshot::Sender<StopReply>,
    monitor: JoinHandle<()>,
}

pub struct ProcessSupervisor {
    spec: ProcessSpec,
    current: Option<ManagedProcess>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("spec", &self.spec)
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(
        spec: ProcessSpec,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            spec,
            current: None,
            runtime_tx,
            reporter,
        }
    }

    /// The process currently occupying the slot, if its monitor is alive.
    pub fn current(&self) -> Option<ProcessInfo> {
        self.current
            .as_ref()
            .filter(|p| !p.monitor.is_finished())
            .map(|p| p.info)
    }

    /// Launch `artifact` as the output of build `seq`.
    ///
    /// Any process still in the slot is stopped first. A process that exits
    /// within the startup grace window counts as a failed start.
    pub async fn start(
        &mut self,
        seq: BuildSeq,
        artifact: &Path,
    ) -> Result<ProcessInfo, ProcessStartError> {
        if self.current.is_some() {
            let outcome = self.stop().await;
            debug!(?outcome, "stopped previous process before start");
        }

        info!(seq, ?artifact, args = ?self.spec.args, "starting managed process");

        let mut cmd = Command::new(artifact);
        cmd.args(&self.spec.args)
            .envs(&self.spec.env)
            .current_dir(&self.spec.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Keep terminal signals (Ctrl-C) away from the child; stopping it is
        // our job.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|err| ProcessStartError::Spawn {
            artifact: artifact.to_path_buf(),
            message: err.to_string(),
        })?;

        let Some(pid) = child.id() else {
            return Err(ProcessStartError::Spawn {
                artifact: artifact.to_path_buf(),
                message: "process exited before its pid could be read".to_string(),
            });
        };

        forward_output(child.stdout.take(), seq, Stream::Stdout, self.reporter.clone());
        forward_output(child.stderr.take(), seq, Stream::Stderr, self.reporter.clone());

        match tokio::time::timeout(self.spec.startup_grace, child.wait()).await {
            Ok(Ok(status)) => {
                let exit = ProcessExit::from_status(status);
                warn!(seq, pid, %exit, "process exited during startup");
                group::kill_group(pid);
                return Err(ProcessStartError::ExitedDuringStartup {
                    artifact: artifact.to_path_buf(),
                    exit,
                });
            }
            Ok(Err(err)) => {
                return Err(ProcessStartError::Spawn {
                    artifact: artifact.to_path_buf(),
                    message: format!("waiting for process: {err}"),
                });
            }
            Err(_still_running) => {}
        }

        let info = ProcessInfo { seq, pid };
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_process(
            child,
            info,
            self.spec.stop_timeout,
            stop_rx,
            self.runtime_tx.clone(),
        ));

        self.current = Some(ManagedProcess {
            info,
            stop_tx,
            monitor,
        });

        info!(seq, pid, "managed process running");
        Ok(info)
    }

    /// Gracefully stop the current process.
    pub async fn stop(&mut self) -> StopOutcome {
        let Some(process) = self.current.take() else {
            return StopOutcome::NotRunning;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if process.stop_tx.send(reply_tx).is_err() {
            // Monitor already saw the process exit on its own.
            return StopOutcome::NotRunning;
        }

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(pid = process.info.pid, "monitor ended without a stop outcome");
                StopOutcome::NotRunning
            }
        }
    }

    /// Stop the current process, then start `artifact`.
    pub async fn restart(
        &mut self,
        seq: BuildSeq,
        artifact: &Path,
    ) -> (StopOutcome, Result<ProcessInfo, ProcessStartError>) {
        let stopped = self.stop().await;
        let started = self.start(seq, artifact).await;
        (stopped, started)
    }
}

impl ProcessBackend for ProcessSupervisor {
    fn start(
        &mut self,
        seq: BuildSeq,
        artifact: PathBuf,
    ) -> Pin<Box<dyn Future<Output = Result<ProcessInfo, ProcessStartError>> + Send + '_>> {
        Box::pin(async move { ProcessSupervisor::start(self, seq, &artifact).await })
    }

    fn stop(&mut self) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + '_>> {
        Box::pin(ProcessSupervisor::stop(self))
    }
}

/// Either report a natural exit or carry out a requested stop.
async fn monitor_process(
    mut child: Child,
    info: ProcessInfo,
    stop_timeout: Duration,
    stop_rx: oneshot::Receiver<StopReply>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    tokio::select! {
        status = child.wait() => {
            let exit = match status {
                Ok(status) => ProcessExit::from_status(status),
                Err(err) => {
                    warn!(pid = info.pid, error = %err, "failed to wait for managed process");
                    ProcessExit { code: None, signal: None }
                }
            };
            info!(seq = info.seq, pid = info.pid, %exit, "managed process exited");
            group::kill_group(info.pid);
            let _ = runtime_tx
                .send(RuntimeEvent::ProcessExited { seq: info.seq, pid: info.pid, exit })
                .await;
        }
        request = stop_rx => {
            let outcome = graceful_stop(&mut child, info.pid, stop_timeout).await;
            match request {
                Ok(reply) => {
                    let _ = reply.send(outcome);
                }
                Err(_) => debug!(pid = info.pid, "supervisor dropped; process stopped"),
            }
        }
    }
}

/// Termination signal to the process group, bounded wait, then kill.
///
/// Whatever the process forked is killed once it has gone, so nothing it
/// started outlives it.
pub async fn graceful_stop(child: &mut Child, pid: u32, timeout: Duration) -> StopOutcome {
    debug!(pid, ?timeout, "requesting graceful stop");
    request_terminate(child, pid);

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => StopOutcome::Graceful {
            pid,
            exit: ProcessExit::from_status(status),
        },
        Ok(Err(err)) => {
            warn!(pid, error = %err, "failed to wait for process after termination signal");
            force_kill(child, pid).await;
            StopOutcome::Graceful {
                pid,
                exit: ProcessExit {
                    code: None,
                    signal: None,
                },
            }
        }
        Err(_) => {
            let timeout = ShutdownTimeout { pid, timeout };
            warn!(%timeout, "graceful stop timed out");
            force_kill(child, pid).await;
            StopOutcome::Forced(timeout)
        }
    };

    group::kill_group(pid);
    outcome
}

#[cfg(unix)]
fn request_terminate(_child: &mut Child, pid: u32) {
    group::terminate_group(pid);
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child, pid: u32) {
    if let Err(err) = child.start_kill() {
        warn!(pid, error = %err, "failed to kill process");
    }
}

async fn force_kill(child: &mut Child, pid: u32) {
    group::kill_group(pid);
    if let Err(err) = child.kill().await {
        warn!(pid, error = %err, "failed to kill process");
    }
}

/// Forward each line of a child pipe to the reporter.
fn forward_output<R>(pipe: Option<R>, seq: BuildSeq, stream: Stream, reporter: Arc<dyn Reporter>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => reporter.process_output(seq, stream, &line),
                Ok(None) => break,
                Err(err) => {
                    debug!(seq, ?stream, error = %err, "stopped forwarding process output");
                    break;
                }
            }
        }
    });
}
