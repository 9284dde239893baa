// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Compiling include / ignore glob patterns into a [`WatchTarget`].
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Optionally dropping changes whose file contents did not change.
//!
//! It knows nothing about builds; it only turns filesystem activity into
//! `RuntimeEvent::FileChanged` / `RuntimeEvent::WatchFailed`.

pub mod event_handler;
pub mod hash;
pub mod path_utils;
pub mod patterns;
pub mod watcher;

pub use event_handler::process_notify_event;
pub use hash::{compute_file_hash, ContentHashes};
pub use patterns::{collect_matching_files, WatchTarget, DEFAULT_IGNORES};
pub use watcher::{spawn_watcher, WatcherHandle};
