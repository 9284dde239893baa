// src/engine/debounce.rs

//! Quiet-window coalescing of change events.
//!
//! The debouncer holds no timers. Every [`Debouncer::push`] returns a fresh
//! generation; the runtime shell arms one timer per generation and reports
//! back with `RuntimeEvent::DebounceElapsed { generation }`. Only the newest
//! generation may flush, so a burst of N events yields exactly one trigger
//! once the window has passed without further events.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::types::ChangeEvent;

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    generation: u64,
    pending: BTreeSet<PathBuf>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: 0,
            pending: BTreeSet::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Add an event to the pending set and restart the quiet window.
    ///
    /// Returns the generation the caller should arm a timer for.
    pub fn push(&mut self, event: ChangeEvent) -> u64 {
        self.generation += 1;
        trace!(
            path = ?event.path,
            kind = %event.kind,
            generation = self.generation,
            "debouncer accepted event"
        );
        self.pending.insert(event.path);
        self.generation
    }

    /// Called when the timer for `generation` fires.
    ///
    /// Returns the union of paths seen since the last flush if `generation`
    /// is still the newest one, `None` for stale timers or an empty window.
    pub fn flush(&mut self, generation: u64) -> Option<Vec<PathBuf>> {
        if generation != self.generation || self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending).into_iter().collect())
    }

    /// True while events are waiting for their window to elapse.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
