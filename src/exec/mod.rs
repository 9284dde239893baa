// src/exec/mod.rs

//! Process execution layer.
//!
//! This module actually runs things, using `tokio::process::Command`, and
//! reports back to the orchestration runtime via `RuntimeEvent`s.
//!
//! - [`backend`] provides the `BuildBackend` / `ProcessBackend` traits the
//!   runtime is written against, and which tests replace with fakes.
//! - [`build`] runs the build command and resolves the artifact.
//! - [`group`] signals a child together with everything it forked.
//! - [`supervisor`] owns the single managed process: start, graceful stop,
//!   restart, exit monitoring and output forwarding.

pub mod backend;
pub mod build;
pub mod group;
pub mod supervisor;

pub use backend::{BuildBackend, ProcessBackend};
pub use build::{run_build, shell_command, ArtifactSource, BuildSpec, CommandBuildBackend};
pub use supervisor::{graceful_stop, ProcessSpec, ProcessSupervisor};
