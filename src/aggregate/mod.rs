// src/aggregate/mod.rs

//! Debounced, aggregated change reporting over many paths.
//!
//! An [`Aggregator`] turns a [`WatchSpec`] into watcher handles, reports
//! every change and removal live, and after `aggregate_timeout` of quiet
//! delivers one [`Aggregated`] batch with the set of changed and removed
//! items. Consumers receive [`AggregatorEvent`]s on the channel returned by
//! [`Aggregator::subscribe`].

pub mod plan;
pub mod state;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::engine::WatcherManager;
use crate::errors::Result;
use crate::types::{Cause, TimeInfoEntries, Timestamp};
use crate::watch::options::{NormalizedOptions, WatchOptions};
use crate::watch::patterns::Ignored;
use crate::watch::watcher::{EventSink, Watcher, WatcherEvent, WatcherEventKind, WatcherId};

pub use plan::{TargetKind, WatchPlan, WatchSpec};
pub use state::Aggregated;

use state::AggregateState;

pub const DEFAULT_AGGREGATE_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    /// Quiet period after the last event before a batch is delivered.
    pub aggregate_timeout: Duration,
    /// Poll at this interval instead of using native notifications.
    pub poll: Option<Duration>,
    pub follow_symlinks: bool,
    pub ignored: Ignored,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            aggregate_timeout: DEFAULT_AGGREGATE_TIMEOUT,
            poll: None,
            follow_symlinks: false,
            ignored: Ignored::None,
        }
    }
}

impl AggregatorOptions {
    pub fn with_aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate_timeout = timeout;
        self
    }

    pub fn with_poll(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_ignored(mut self, ignored: Ignored) -> Self {
        self.ignored = ignored;
        self
    }

    pub fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            poll: self.poll,
            follow_symlinks: self.follow_symlinks,
            ignored: self.ignored.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorEvent {
    /// `file` is the watched item, or for directory items the entry that
    /// changed below it.
    Change {
        file: PathBuf,
        mtime: Option<Timestamp>,
        cause: Cause,
    },
    Remove {
        file: PathBuf,
        cause: Cause,
    },
    Aggregated(Aggregated),
}

struct ActiveTarget {
    watcher: Watcher,
    items: BTreeSet<PathBuf>,
}

struct Inner {
    state: AggregateState,
    targets: HashMap<(TargetKind, PathBuf), ActiveTarget>,
    by_id: HashMap<WatcherId, (TargetKind, PathBuf)>,
    missing: BTreeSet<PathBuf>,
    subscribers: Vec<mpsc::UnboundedSender<AggregatorEvent>>,
}

impl Inner {
    fn broadcast(&mut self, event: AggregatorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn record_change(&mut self, item: PathBuf, file: PathBuf, mtime: Option<Timestamp>, cause: Cause) {
        if self.state.on_change(item) {
            self.broadcast(AggregatorEvent::Change { file, mtime, cause });
        }
    }

    fn record_remove(&mut self, item: PathBuf, file: PathBuf, cause: Cause) {
        if self.state.on_remove(item) {
            self.broadcast(AggregatorEvent::Remove { file, cause });
        }
    }

    fn on_event(&mut self, event: WatcherEvent) {
        let Some(key) = self.by_id.get(&event.watcher) else {
            trace!(watcher = %event.watcher, "event for a released watcher");
            return;
        };
        let Some(target) = self.targets.get(key) else {
            return;
        };
        let kind = key.0;
        let items: Vec<PathBuf> = target.items.iter().cloned().collect();

        for item in items {
            match (kind, &event.kind) {
                (TargetKind::File, WatcherEventKind::Change { mtime, cause, .. }) => {
                    self.record_change(item.clone(), item, *mtime, *cause);
                }
                (TargetKind::File, WatcherEventKind::Remove { cause }) => {
                    self.record_remove(item.clone(), item, *cause);
                }
                (TargetKind::File, WatcherEventKind::InitialMissing { cause }) => {
                    if !self.missing.contains(&item) {
                        self.record_remove(item.clone(), item, *cause);
                    }
                }
                (TargetKind::Directory, WatcherEventKind::Change { path, mtime, cause, .. }) => {
                    self.record_change(item, path.clone(), *mtime, *cause);
                }
                (
                    TargetKind::Directory,
                    WatcherEventKind::Remove { cause } | WatcherEventKind::InitialMissing { cause },
                ) => {
                    self.record_remove(item.clone(), item, *cause);
                }
            }
        }
    }

    fn release_all(&mut self) -> Vec<Watcher> {
        self.by_id.clear();
        self.targets.drain().map(|(_, target)| target.watcher).collect()
    }
}

struct AggregatorShared {
    manager: WatcherManager,
    options: Arc<NormalizedOptions>,
    inner: Mutex<Inner>,
    /// Wakes the event loop after the deadline changed from outside.
    wake: Notify,
    sink: EventSink,
}

impl AggregatorShared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Aggregator {
    shared: Arc<AggregatorShared>,
    task: JoinHandle<()>,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Aggregator on a fresh [`WatcherManager`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(options: AggregatorOptions) -> Result<Self> {
        Self::with_manager(WatcherManager::new(), options)
    }

    /// Aggregator sharing the directory watchers of `manager`.
    pub fn with_manager(manager: WatcherManager, options: AggregatorOptions) -> Result<Self> {
        let normalized = NormalizedOptions::normalize(&options.watch_options())?;
        let (sink, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(AggregatorShared {
            manager,
            options: normalized,
            inner: Mutex::new(Inner {
                state: AggregateState::new(options.aggregate_timeout),
                targets: HashMap::new(),
                by_id: HashMap::new(),
                missing: BTreeSet::new(),
                subscribers: Vec::new(),
            }),
            wake: Notify::new(),
            sink,
        });
        let task = tokio::spawn(run(Arc::clone(&shared), rx));
        Ok(Self { shared, task })
    }

    /// Receive live and aggregated events. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AggregatorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    /// Replace the watched set with `spec` and resume reporting.
    ///
    /// Paths watched before and after keep their handle, so no initial
    /// events are repeated for them.
    pub fn watch(&self, spec: WatchSpec) -> Result<()> {
        let fs = self.shared.manager.file_system();
        let plan = plan::plan(&spec, &self.shared.options, &fs)?;

        let mut inner = self.shared.lock();
        let mut previous = std::mem::take(&mut inner.targets);
        inner.by_id.clear();
        let (mut kept, mut created) = (0usize, 0usize);

        let mut result = Ok(());
        for (key, items) in plan {
            let watcher = match previous.remove(&key) {
                Some(active) => {
                    kept += 1;
                    active.watcher
                }
                None => match self.open(&key, spec.start_time) {
                    Ok(watcher) => {
                        created += 1;
                        watcher
                    }
                    Err(err) => {
                        result = Err(err);
                        break;
                    }
                },
            };
            inner.by_id.insert(watcher.id(), key.clone());
            inner.targets.insert(key, ActiveTarget { watcher, items });
        }

        inner.missing = spec.missing.iter().cloned().collect();
        inner.state.resume();
        let dropped = previous.len();
        drop(previous);
        drop(inner);
        self.shared.wake.notify_one();

        debug!(kept, created, dropped, "aggregator watch plan applied");
        result
    }

    fn open(&self, key: &(TargetKind, PathBuf), start_time: Option<Timestamp>) -> Result<Watcher> {
        let manager = &self.shared.manager;
        let options = &self.shared.options;
        let sink = self.shared.sink.clone();
        match key.0 {
            TargetKind::File => manager.watch_file(&key.1, options, start_time, sink),
            TargetKind::Directory => manager.watch_directory(&key.1, options, start_time, sink),
        }
    }

    /// Stop emitting; changes keep being recorded.
    pub fn pause(&self) {
        self.shared.lock().state.pause();
        self.shared.wake.notify_one();
    }

    pub fn resume(&self) {
        self.shared.lock().state.resume();
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().state.is_paused()
    }

    /// Take the pending batch now instead of waiting for the timeout.
    pub fn get_aggregated(&self) -> Aggregated {
        let batch = self.shared.lock().state.take();
        self.shared.wake.notify_one();
        batch
    }

    /// Release every watcher and drop pending changes. No final batch is
    /// delivered. Calling it again does nothing.
    pub fn close(&self) {
        let released = {
            let mut inner = self.shared.lock();
            inner.state.clear();
            inner.release_all()
        };
        if !released.is_empty() {
            debug!(watchers = released.len(), "aggregator closed");
        }
        drop(released);
        self.shared.wake.notify_one();
    }

    /// Merged time info of every directory watcher in use.
    pub fn time_info_entries(&self) -> TimeInfoEntries {
        let inner = self.shared.lock();
        self.shared
            .manager
            .time_info_entries(inner.targets.values().map(|t| &t.watcher))
    }

    /// Safe time per known path, `None` for missing ones.
    pub fn times(&self) -> BTreeMap<PathBuf, Option<Timestamp>> {
        self.time_info_entries()
            .into_iter()
            .map(|(path, info)| (path, info.map(|i| i.safe_time)))
            .collect()
    }

    /// Number of active watcher handles.
    pub fn watcher_count(&self) -> usize {
        self.shared.lock().targets.len()
    }

    pub fn manager(&self) -> &WatcherManager {
        &self.shared.manager
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.task.abort();
        self.close();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run(shared: Arc<AggregatorShared>, mut rx: mpsc::UnboundedReceiver<WatcherEvent>) {
    loop {
        let deadline = shared.lock().state.deadline();
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => shared.lock().on_event(event),
                None => break,
            },
            _ = sleep_until(deadline) => {
                let mut inner = shared.lock();
                if let Some(batch) = inner.state.fire(Instant::now()) {
                    if !batch.is_empty() {
                        debug!(
                            changes = batch.changes.len(),
                            removals = batch.removals.len(),
                            "aggregated batch ready"
                        );
                        inner.broadcast(AggregatorEvent::Aggregated(batch));
                    }
                }
            }
            _ = shared.wake.notified() => {}
        }
    }
}
