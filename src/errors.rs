// src/errors.rs

//! Crate-wide error type plus the domain errors of the watch/build/run loop.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fatal watcher failure; terminates the loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("watch root {0:?} is no longer accessible")]
    RootInaccessible(PathBuf),

    #[error("file watcher failed: {0}")]
    Backend(String),
}

/// Why a build did not produce a runnable artifact. Recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("build command exited with code {0}")]
    NonZeroExit(i32),

    #[error("build command was terminated by signal {0}")]
    Signalled(i32),

    #[error("failed to run build command: {0}")]
    Spawn(String),

    #[error("build succeeded but artifact {0:?} does not exist")]
    ArtifactMissing(PathBuf),

    #[error("build succeeded but no artifact path matched `{0}` in its output")]
    ArtifactNotReported(String),
}

/// The built artifact could not be brought up. Recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessStartError {
    #[error("failed to launch {artifact:?}: {message}")]
    Spawn { artifact: PathBuf, message: String },

    #[error("{artifact:?} exited during startup ({exit})")]
    ExitedDuringStartup {
        artifact: PathBuf,
        exit: crate::types::ProcessExit,
    },
}

/// Graceful stop exceeded its bound and the process was killed. Logged as a
/// warning, never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("process {pid} did not exit within {timeout:?} of the termination signal; killed")]
pub struct ShutdownTimeout {
    pub pid: u32,
    pub timeout: Duration,
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, WatchrunError>;
