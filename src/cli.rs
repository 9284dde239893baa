// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::RawConfigFile;

/// Command-line arguments for `watchrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchrun",
    version,
    about = "Rebuild and restart a program whenever its sources change.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Watchrun.toml` in the current working directory. A missing
    /// default file is fine as long as `--cmd` and `--artifact` are given.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Project root to watch (overrides `[watch].root`).
    #[arg(long, value_name = "DIR")]
    pub root: Option<String>,

    /// Build command (overrides `[build].cmd`).
    #[arg(long, value_name = "CMD")]
    pub cmd: Option<String>,

    /// Artifact path relative to the root (overrides `[build].artifact`).
    #[arg(long, value_name = "PATH")]
    pub artifact: Option<String>,

    /// Debounce window, e.g. `200ms` or `1s` (overrides `[watch].debounce`).
    #[arg(long, value_name = "DUR")]
    pub debounce: Option<String>,

    /// Wait for the first change instead of building at startup.
    #[arg(long)]
    pub no_initial_build: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WATCHRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the effective configuration, but don't build
    /// or run anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Apply command-line overrides on top of the file configuration.
    pub fn apply_overrides(&self, raw: &mut RawConfigFile) {
        if let Some(root) = &self.root {
            raw.watch.root = root.clone();
        }
        if let Some(cmd) = &self.cmd {
            raw.build.cmd = cmd.clone();
        }
        if let Some(artifact) = &self.artifact {
            raw.build.artifact = Some(artifact.clone());
            // An explicit path wins over a pattern from the file.
            raw.build.artifact_pattern = None;
        }
        if let Some(debounce) = &self.debounce {
            raw.watch.debounce = debounce.clone();
        }
        if self.no_initial_build {
            raw.build.initial_build = false;
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
