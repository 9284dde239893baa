// src/watch/watcher.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::RuntimeEvent;
use crate::errors::WatchError;
use crate::fs::FileSystem;
use crate::watch::event_handler::{process_notify_event, root_is_accessible};
use crate::watch::hash::ContentHashes;
use crate::watch::patterns::WatchTarget;

/// How often the root is checked for existence between events. Some
/// backends stay silent when the watched directory itself is removed.
const ROOT_CHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Handle for the filesystem watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive. Dropping it stops
/// watching; calling [`spawn_watcher`] again starts a fresh watch.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch `target.root()` recursively and send `RuntimeEvent::FileChanged`
/// for every change that passes the target's filters.
///
/// If the root becomes inaccessible a single `RuntimeEvent::WatchFailed` is
/// sent and the watch loop ends.
pub fn spawn_watcher(
    target: WatchTarget,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    fs: Arc<dyn FileSystem>,
) -> Result<WatcherHandle> {
    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            // The receiver only goes away when the watcher is being dropped.
            let _ = event_tx.send(res);
        },
        Config::default(),
    )?;

    watcher.watch(target.root(), RecursiveMode::Recursive)?;

    info!(root = ?target.root(), "file watcher started");

    let mut hashes = if target.use_hash() {
        let mut store = ContentHashes::new();
        match store.prime(fs.as_ref(), &target) {
            Ok(n) => debug!(files = n, "primed content hashes"),
            Err(e) => warn!(error = %e, "failed to prime content hashes"),
        }
        Some(store)
    } else {
        None
    };

    let task = tokio::spawn(async move {
        let mut root_check = tokio::time::interval(ROOT_CHECK_INTERVAL);

        let failure = loop {
            tokio::select! {
                res = event_rx.recv() => {
                    let Some(res) = res else {
                        debug!("notify channel closed");
                        return;
                    };

                    let event = match res {
                        Ok(event) => event,
                        Err(err) => {
                            if root_is_accessible(fs.as_ref(), target.root()) {
                                warn!(error = %err, "file watch error");
                                continue;
                            }
                            break WatchError::Backend(err.to_string());
                        }
                    };

                    debug!(?event, "received notify event");

                    match process_notify_event(fs.as_ref(), &target, hashes.as_mut(), &event) {
                        Ok(changes) => {
                            for change in changes {
                                if runtime_tx.send(RuntimeEvent::FileChanged(change)).await.is_err() {
                                    debug!("runtime channel closed; stopping watcher loop");
                                    return;
                                }
                            }
                        }
                        Err(err) => break err,
                    }
                }
                _ = root_check.tick() => {
                    if !root_is_accessible(fs.as_ref(), target.root()) {
                        break WatchError::RootInaccessible(target.root().to_path_buf());
                    }
                }
            }
        };

        error!(error = %failure, "watcher stopped");
        let _ = runtime_tx.send(RuntimeEvent::WatchFailed(failure)).await;
    });

    Ok(WatcherHandle {
        _inner: watcher,
        task,
    })
}
