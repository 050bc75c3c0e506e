// src/aggregate/state.rs

//! Pending change / removal sets and the debounce deadline.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

/// One batch of coalesced changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregated {
    pub changes: BTreeSet<PathBuf>,
    pub removals: BTreeSet<PathBuf>,
}

impl Aggregated {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.removals.is_empty()
    }
}

/// An item lives in at most one of the two sets; the latest event wins.
#[derive(Debug)]
pub(crate) struct AggregateState {
    pending: Aggregated,
    paused: bool,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl AggregateState {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            pending: Aggregated::default(),
            paused: false,
            deadline: None,
            timeout,
        }
    }

    /// Record a change. Returns whether it should be reported live.
    pub(crate) fn on_change(&mut self, item: PathBuf) -> bool {
        self.pending.removals.remove(&item);
        self.pending.changes.insert(item);
        self.touch()
    }

    /// Record a removal. Returns whether it should be reported live.
    pub(crate) fn on_remove(&mut self, item: PathBuf) -> bool {
        self.pending.changes.remove(&item);
        self.pending.removals.insert(item);
        self.touch()
    }

    fn touch(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.deadline = Some(Instant::now() + self.timeout);
        true
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
        self.deadline = None;
    }

    pub(crate) fn resume(&mut self) {
        self.paused = false;
        if !self.pending.is_empty() && self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.timeout);
        }
    }

    /// Drain the pending sets and cancel the deadline.
    pub(crate) fn take(&mut self) -> Aggregated {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    /// Called when the deadline passed. `None` when paused or nothing is due.
    pub(crate) fn fire(&mut self, now: Instant) -> Option<Aggregated> {
        match self.deadline {
            Some(deadline) if !self.paused && deadline <= now => Some(self.take()),
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.deadline = None;
        self.pending = Aggregated::default();
    }
}
