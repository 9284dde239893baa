// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod report;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{default_config_path, load_from_path, load_or_default, ConfigFile};
use crate::engine::{CoreOptions, CoreRuntime, ExitReason, Runtime, RuntimeEvent};
use crate::errors::WatchError;
use crate::exec::{BuildSpec, CommandBuildBackend, ProcessSpec, ProcessSupervisor};
use crate::fs::{FileSystem, RealFileSystem};
use crate::report::{Reporter, StdoutReporter};
use crate::types::TriggerReason;
use crate::watch::{spawn_watcher, WatchTarget};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading (file + CLI overrides)
/// - build backend and process supervisor
/// - file watcher
/// - Ctrl-C / SIGTERM handling
/// - the core runtime and its async shell
pub async fn run(args: CliArgs) -> Result<i32> {
    let (config_path, cfg) = load_config(&args)?;

    let base = if args.root.is_some() {
        std::env::current_dir().context("reading current directory")?
    } else {
        config_root_dir(&config_path)
    };
    let root = resolve_root(&base, &cfg.watch.root)?;

    if args.dry_run {
        print_dry_run(&config_path, &root, &cfg);
        return Ok(0);
    }

    info!(?root, config = ?config_path, "watchrun starting");

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

    let reporter: Arc<dyn Reporter> = Arc::new(StdoutReporter);

    let builds = CommandBuildBackend::new(BuildSpec::from_config(&root, &cfg.build)?, rt_tx.clone());
    let processes = ProcessSupervisor::new(
        ProcessSpec::from_config(&root, &cfg.process),
        rt_tx.clone(),
        reporter.clone(),
    );

    let target = WatchTarget::from_config(&root, &cfg.watch)?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let _watcher_handle = spawn_watcher(target, rt_tx.clone(), fs)?;

    spawn_signal_handlers(rt_tx.clone());

    if cfg.build.initial_build {
        rt_tx
            .send(RuntimeEvent::BuildRequested {
                reason: TriggerReason::Startup,
            })
            .await?;
    }

    // Construct the pure core runtime (single source of truth for semantics).
    let core = CoreRuntime::new(CoreOptions::from_config(&cfg));

    // Construct the async IO shell around the core.
    let runtime = Runtime::new(core, &rt_tx, rt_rx, builds, processes, reporter);
    drop(rt_tx);

    match runtime.run().await? {
        ExitReason::WatchFailed(err) => Err(err.into()),
        reason => Ok(reason.exit_code().unwrap_or(1)),
    }
}

/// Load the config file (a missing default file is allowed), apply CLI
/// overrides and validate.
fn load_config(args: &CliArgs) -> Result<(PathBuf, ConfigFile)> {
    let (path, mut raw) = match &args.config {
        Some(path) => {
            let raw = load_from_path(path)
                .with_context(|| format!("loading config file {}", path.display()))?;
            (path.clone(), raw)
        }
        None => {
            let path = default_config_path();
            let raw = load_or_default(&path)
                .with_context(|| format!("loading config file {}", path.display()))?;
            (path, raw)
        }
    };

    args.apply_overrides(&mut raw);
    let cfg = ConfigFile::try_from(raw)?;
    Ok((path, cfg))
}

/// Resolve the watch root against `base` and make sure it exists.
fn resolve_root(base: &Path, root: &Path) -> Result<PathBuf> {
    let joined = if root.is_absolute() {
        root.to_path_buf()
    } else {
        base.join(root)
    };
    let resolved = joined
        .canonicalize()
        .map_err(|_| WatchError::RootInaccessible(joined.clone()))?;
    if !resolved.is_dir() {
        return Err(WatchError::RootInaccessible(resolved).into());
    }
    Ok(resolved)
}

/// Figure out the directory relative config paths are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "configs/Watchrun.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Watchrun.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Ctrl-C, and SIGTERM on Unix, become `ShutdownRequested`.
fn spawn_signal_handlers(tx: mpsc::Sender<RuntimeEvent>) {
    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            return;
        }
        let _ = ctrl_c_tx.send(RuntimeEvent::ShutdownRequested).await;
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                return;
            }
        };
        if term.recv().await.is_some() {
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        }
    });

    #[cfg(not(unix))]
    drop(tx);
}

/// Print the effective configuration.
fn print_dry_run(config_path: &Path, root: &Path, cfg: &ConfigFile) {
    println!("watchrun dry-run");
    println!("  config: {}", config_path.display());
    println!("  root: {}", root.display());
    println!();

    println!("[watch]");
    if !cfg.watch.include.is_empty() {
        println!("  include: {:?}", cfg.watch.include);
    }
    println!("  ignore: {:?}", cfg.watch.ignore);
    println!("  use_hash: {}", cfg.watch.use_hash);
    println!("  debounce: {:?}", cfg.watch.debounce);

    println!("[build]");
    println!("  cmd: {}", cfg.build.cmd);
    if let Some(ref artifact) = cfg.build.artifact {
        println!("  artifact: {}", artifact.display());
    }
    if let Some(ref pattern) = cfg.build.artifact_pattern {
        println!("  artifact_pattern: {pattern}");
    }
    println!("  while_building: {:?}", cfg.build.while_building);
    println!("  initial_build: {}", cfg.build.initial_build);

    println!("[process]");
    if !cfg.process.args.is_empty() {
        println!("  args: {:?}", cfg.process.args);
    }
    for (key, value) in &cfg.process.env {
        println!("  env: {key}={value}");
    }
    println!("  stop_timeout: {:?}", cfg.process.stop_timeout);
    println!("  startup_grace: {:?}", cfg.process.startup_grace);
    if cfg.process.keep_running_during_build {
        println!("  keep_running_during_build: true");
    }

    debug!("dry-run complete (no execution)");
}
