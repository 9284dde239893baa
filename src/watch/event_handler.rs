// src/watch/event_handler.rs

//! Turns raw `notify` events into ignore-filtered [`ChangeEvent`]s.

use std::path::Path;

use notify::{Event, EventKind};
use tracing::{debug, warn};

use crate::errors::WatchError;
use crate::fs::FileSystem;
use crate::types::{ChangeEvent, ChangeKind};
use crate::watch::hash::ContentHashes;
use crate::watch::path_utils::relative_str;
use crate::watch::patterns::WatchTarget;

/// Map a notify event kind onto a change kind. Access and metadata-only
/// noise returns `None`.
pub fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        EventKind::Any => Some(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => None,
    }
}

/// True while the watch root still exists as a directory.
pub fn root_is_accessible(fs: &dyn FileSystem, root: &Path) -> bool {
    fs.is_dir(root)
}

/// Process a single notify event.
///
/// 1. Fails with [`WatchError::RootInaccessible`] if the root went away.
/// 2. Relativises each path and drops ignored / non-included ones. This is
///    the only place events enter the pipeline, so ignores always run first.
/// 3. Applies the optional content-hash filter.
pub fn process_notify_event(
    fs: &dyn FileSystem,
    target: &WatchTarget,
    hashes: Option<&mut ContentHashes>,
    event: &Event,
) -> Result<Vec<ChangeEvent>, WatchError> {
    let root = target.root();

    if !root_is_accessible(fs, root) {
        return Err(WatchError::RootInaccessible(root.to_path_buf()));
    }

    let Some(kind) = change_kind(&event.kind) else {
        return Ok(Vec::new());
    };

    let mut hashes = hashes;
    let mut changes = Vec::new();

    for path in &event.paths {
        let Some(rel) = relative_str(root, path) else {
            warn!(?path, ?root, "could not relativize event path against root");
            continue;
        };
        if rel.is_empty() {
            continue;
        }
        if !target.matches(&rel) {
            debug!(path = %rel, "ignored change");
            continue;
        }

        // Renames report the old name as a modification of a path that no
        // longer exists.
        let kind = if kind != ChangeKind::Removed && !fs.exists(path) {
            ChangeKind::Removed
        } else {
            kind
        };

        if let Some(store) = hashes.as_deref_mut() {
            if kind == ChangeKind::Removed {
                store.forget(path);
            } else if fs.is_file(path) {
                match store.record(fs, path) {
                    Ok(false) => {
                        debug!(path = %rel, "content unchanged; dropping event");
                        continue;
                    }
                    Ok(true) => {}
                    Err(err) => {
                        warn!(path = %rel, error = %err, "failed to hash changed file; reporting anyway");
                    }
                }
            }
        }

        debug!(path = %rel, %kind, "change accepted");
        changes.push(ChangeEvent::new(rel, kind));
    }

    Ok(changes)
}
