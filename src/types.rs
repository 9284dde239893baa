// src/types.rs

//! Data model shared by the watcher, the build runner, the process supervisor
//! and the orchestration core.

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime};

use serde::Deserialize;

use crate::errors::{BuildError, ShutdownTimeout};

/// Monotonically increasing build sequence number (starts at 1).
pub type BuildSeq = u64;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// A single filesystem change that survived ignore filtering.
///
/// `path` is relative to the watch root. Events are ephemeral: the debouncer
/// folds them into its pending path set and drops them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub at: SystemTime,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            at: SystemTime::now(),
        }
    }
}

/// Why a build was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Initial build seeded when the supervisor starts.
    Startup,
    /// Coalesced filesystem changes.
    FileChange,
}

/// One build attempt.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub seq: BuildSeq,
    pub started_at: Instant,
    /// Changed paths that triggered this build (sorted, deduplicated).
    pub paths: Vec<PathBuf>,
    pub reason: TriggerReason,
}

// `started_at` is wall-clock noise; two jobs are the same job when their
// sequence and trigger match.
impl PartialEq for BuildJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.paths == other.paths && self.reason == other.reason
    }
}

/// Captured output of a build command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded { artifact: PathBuf },
    Failed { error: BuildError },
    /// The build was killed before finishing (superseded or shutdown).
    Cancelled,
}

/// Immutable result of a [`BuildJob`].
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub seq: BuildSeq,
    pub outcome: BuildOutcome,
    pub output: BuildOutput,
    pub duration: Duration,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Succeeded { .. })
    }

    pub fn artifact(&self) -> Option<&PathBuf> {
        match &self.outcome {
            BuildOutcome::Succeeded { artifact } => Some(artifact),
            _ => None,
        }
    }

    /// Text shown to the user when the build fails.
    ///
    /// This is the captured stderr verbatim; compilers that report on stdout
    /// fall back to stdout when stderr is empty.
    pub fn diagnostics(&self) -> &str {
        if self.output.stderr.trim().is_empty() {
            &self.output.stdout
        } else {
            &self.output.stderr
        }
    }
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Building,
    Starting,
    Running,
    Failed,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Building => "building",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Behaviour when a new trigger arrives while a build is already in flight.
///
/// - `Queue`: let the running build finish, discard its result, then build
///   again with everything that changed in the meantime (default).
/// - `Cancel`: kill the running build right away and start the newer one as
///   soon as the cancelled build has released its resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriggerWhileBuildingBehaviour {
    #[default]
    Queue,
    Cancel,
}

/// How a managed process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Result of asking the supervisor to stop the managed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no live process.
    NotRunning,
    /// The process exited within the stop timeout.
    Graceful { pid: u32, exit: ProcessExit },
    /// The stop timeout elapsed and the process was killed.
    Forced(ShutdownTimeout),
}

/// Process id plus the build it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub seq: BuildSeq,
    pub pid: u32,
}
