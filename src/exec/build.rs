// src/exec/build.rs

//! Build runner.
//!
//! Runs the configured build command through the platform shell in the
//! project root, captures stdout / stderr concurrently and resolves the
//! artifact path once the command exits 0.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BuildConfig;
use crate::engine::RuntimeEvent;
use crate::errors::{BuildError, Result, WatchrunError};
use crate::exec::backend::BuildBackend;
use crate::exec::group;
use crate::types::{BuildJob, BuildOutcome, BuildOutput, BuildResult, BuildSeq};

/// How long output is still read after the build command has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long [`CommandBuildBackend::shutdown`] waits for a cancelled build.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// Where the runnable artifact comes from.
#[derive(Debug, Clone)]
pub enum ArtifactSource {
    /// Fixed path, relative to the project root unless absolute.
    Path(PathBuf),
    /// First capture group of the first match in the build's stdout.
    Pattern(Regex),
}

/// Everything needed to run one build.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub root: PathBuf,
    pub cmd: String,
    pub artifact: ArtifactSource,
}

impl BuildSpec {
    pub fn from_config(root: impl Into<PathBuf>, cfg: &BuildConfig) -> Result<Self> {
        let artifact = match (&cfg.artifact_pattern, &cfg.artifact) {
            (Some(pattern), _) => ArtifactSource::Pattern(Regex::new(pattern).map_err(|e| {
                WatchrunError::ConfigError(format!("invalid build.artifact_pattern: {e}"))
            })?),
            (None, Some(path)) => ArtifactSource::Path(path.clone()),
            (None, None) => {
                return Err(WatchrunError::ConfigError(
                    "build.artifact or build.artifact_pattern is required".to_string(),
                ));
            }
        };

        Ok(Self {
            root: root.into(),
            cmd: cfg.cmd.clone(),
            artifact,
        })
    }

    /// Locate the artifact after a successful build.
    pub fn resolve_artifact(&self, stdout: &str) -> std::result::Result<PathBuf, BuildError> {
        let path = match &self.artifact {
            ArtifactSource::Path(path) => path.clone(),
            ArtifactSource::Pattern(re) => {
                let found = re
                    .captures_iter(stdout)
                    .find_map(|caps| caps.get(1))
                    .ok_or_else(|| BuildError::ArtifactNotReported(re.as_str().to_string()))?;
                PathBuf::from(found.as_str().trim())
            }
        };

        let path = if path.is_absolute() {
            path
        } else {
            self.root.join(path)
        };

        if !path.is_file() {
            return Err(BuildError::ArtifactMissing(path));
        }
        Ok(path)
    }
}

/// Build a shell command appropriate for the platform.
pub fn shell_command(cmd: &str, cwd: &Path) -> Command {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    command.current_dir(cwd);
    command
}

/// Run a single build to completion or cancellation.
///
/// Never fails: spawn errors, non-zero exits and missing artifacts all end up
/// in the returned [`BuildResult`].
pub async fn run_build(
    job: BuildJob,
    spec: &BuildSpec,
    mut cancel_rx: oneshot::Receiver<()>,
) -> BuildResult {
    let started = Instant::now();
    let seq = job.seq;

    info!(seq, cmd = %spec.cmd, root = ?spec.root, "running build command");

    let mut cmd = shell_command(&spec.cmd, &spec.root);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so cancellation also reaches the shell's children.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(seq, error = %err, "failed to spawn build command");
            return BuildResult {
                seq,
                outcome: BuildOutcome::Failed {
                    error: BuildError::Spawn(err.to_string()),
                },
                output: BuildOutput::default(),
                duration: started.elapsed(),
            };
        }
    };

    // Read before the child is reaped; `id()` is `None` afterwards.
    let pid = child.id();
    let mut stdout = Captured::spawn(child.stdout.take());
    let mut stderr = Captured::spawn(child.stderr.take());

    let cancelled = || {
        info!(seq, ?pid, "build cancelled");
        BuildResult {
            seq,
            outcome: BuildOutcome::Cancelled,
            output: BuildOutput::default(),
            duration: started.elapsed(),
        }
    };

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut cancel_rx => None,
    };

    let Some(status) = waited else {
        kill_build(&mut child, pid).await;
        stdout.abort();
        stderr.abort();
        return cancelled();
    };

    // Background jobs the command left behind would hold the pipes open.
    if let Some(pid) = pid {
        group::kill_group(pid);
    }

    let drained = tokio::select! {
        finished = drain(&mut stdout, &mut stderr) => Some(finished),
        _ = &mut cancel_rx => None,
    };
    stdout.abort();
    stderr.abort();
    match drained {
        None => return cancelled(),
        Some(false) => warn!(
            seq,
            timeout = ?OUTPUT_DRAIN_TIMEOUT,
            "build output still open after the command exited; using what was read"
        ),
        Some(true) => {}
    }

    let output = BuildOutput {
        stdout: stdout.text(),
        stderr: stderr.text(),
    };

    let outcome = match status {
        Err(err) => BuildOutcome::Failed {
            error: BuildError::Spawn(format!("waiting for build command: {err}")),
        },
        Ok(status) if status.success() => match spec.resolve_artifact(&output.stdout) {
            Ok(artifact) => BuildOutcome::Succeeded { artifact },
            Err(error) => BuildOutcome::Failed { error },
        },
        Ok(status) => {
            let exit = crate::types::ProcessExit::from_status(status);
            let error = match (exit.code, exit.signal) {
                (Some(code), _) => BuildError::NonZeroExit(code),
                (None, Some(sig)) => BuildError::Signalled(sig),
                (None, None) => BuildError::NonZeroExit(-1),
            };
            BuildOutcome::Failed { error }
        }
    };

    let duration = started.elapsed();
    debug!(seq, ?outcome, ?duration, "build finished");

    BuildResult {
        seq,
        outcome,
        output,
        duration,
    }
}

/// A pipe read to the end on its own task. The bytes are shared so a
/// drain that gives up still keeps what arrived.
struct Captured {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl Captured {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = buf.clone();
        let task = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sink
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .extend_from_slice(&chunk[..n]),
                    Err(err) => {
                        debug!(error = %err, "error reading build output");
                        break;
                    }
                }
            }
        });
        Self { buf, task }
    }

    fn abort(&self) {
        self.task.abort();
    }

    fn text(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Wait for both pipes to reach EOF. `false` if they were still open after
/// [`OUTPUT_DRAIN_TIMEOUT`].
async fn drain(stdout: &mut Captured, stderr: &mut Captured) -> bool {
    let both = async {
        let _ = (&mut stdout.task).await;
        let _ = (&mut stderr.task).await;
    };
    tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, both).await.is_ok()
}

async fn kill_build(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        group::kill_group(pid);
    }
    if let Err(err) = child.kill().await {
        debug!(error = %err, "failed to kill build process on cancellation");
    }
}

struct ActiveBuild {
    seq: BuildSeq,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

/// Production build backend: one background task per build, reporting
/// through `RuntimeEvent::BuildFinished`.
pub struct CommandBuildBackend {
    spec: Arc<BuildSpec>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    active: Option<ActiveBuild>,
}

impl std::fmt::Debug for CommandBuildBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuildBackend")
            .field("spec", &self.spec)
            .field("active", &self.active.as_ref().map(|a| a.seq))
            .finish()
    }
}

impl CommandBuildBackend {
    pub fn new(spec: BuildSpec, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            spec: Arc::new(spec),
            runtime_tx,
            active: None,
        }
    }
}

impl BuildBackend for CommandBuildBackend {
    fn start_build(&mut self, job: BuildJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(prev) = self.active.take() {
                if !prev.handle.is_finished() {
                    warn!(seq = prev.seq, "previous build still running; cancelling it");
                    if let Some(cancel) = prev.cancel {
                        let _ = cancel.send(());
                    }
                    prev.handle
                        .await
                        .context("waiting for superseded build task")?;
                }
            }

            let (cancel_tx, cancel_rx) = oneshot::channel();
            let spec = Arc::clone(&self.spec);
            let runtime_tx = self.runtime_tx.clone();
            let seq = job.seq;

            let handle = tokio::spawn(async move {
                let result = run_build(job, &spec, cancel_rx).await;
                if runtime_tx.send(RuntimeEvent::BuildFinished(result)).await.is_err() {
                    debug!(seq, "runtime channel closed; dropping build result");
                }
            });

            self.active = Some(ActiveBuild {
                seq,
                cancel: Some(cancel_tx),
                handle,
            });
            Ok(())
        })
    }

    fn cancel_build(&mut self, seq: BuildSeq) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.active.as_mut() {
                Some(active) if active.seq == seq => {
                    if let Some(cancel) = active.cancel.take() {
                        let _ = cancel.send(());
                    }
                }
                _ => debug!(seq, "cancel requested for a build that is not running"),
            }
        })
    }

    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let Some(mut active) = self.active.take() else {
                return;
            };
            if let Some(cancel) = active.cancel.take() {
                let _ = cancel.send(());
            }
            match tokio::time::timeout(SHUTDOWN_WAIT, &mut active.handle).await {
                Ok(_) => debug!(seq = active.seq, "build task finished"),
                Err(_) => {
                    warn!(seq = active.seq, "build task did not finish in time; aborting");
                    active.handle.abort();
                }
            }
        })
    }
}
