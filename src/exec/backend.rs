// src/exec/backend.rs

//! Pluggable build and process backends.
//!
//! The runtime talks to a [`BuildBackend`] and a [`ProcessBackend`] instead of
//! spawning anything itself. Production code uses
//! [`CommandBuildBackend`](super::build::CommandBuildBackend) and
//! [`ProcessSupervisor`](super::supervisor::ProcessSupervisor); tests can
//! provide implementations that record calls and emit `RuntimeEvent`s by hand.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::{ProcessStartError, Result};
use crate::types::{BuildJob, BuildSeq, ProcessInfo, StopOutcome};

/// Runs build jobs in the background.
///
/// Every started job must eventually produce exactly one
/// `RuntimeEvent::BuildFinished` on the runtime channel, including cancelled
/// ones (as `BuildOutcome::Cancelled`).
pub trait BuildBackend: Send {
    fn start_build(&mut self, job: BuildJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Kill build `seq` if it is still running. Unknown or finished builds
    /// are ignored.
    fn cancel_build(&mut self, seq: BuildSeq) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Cancel whatever is running and wait for it to release its resources.
    fn shutdown(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Owns the single managed process slot.
pub trait ProcessBackend: Send {
    /// Start `artifact` as the output of build `seq`, stopping any process
    /// that is still running first.
    fn start(
        &mut self,
        seq: BuildSeq,
        artifact: PathBuf,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<ProcessInfo, ProcessStartError>> + Send + '_>>;

    /// Gracefully stop the managed process, if any.
    fn stop(&mut self) -> Pin<Box<dyn Future<Output = StopOutcome> + Send + '_>>;
}
