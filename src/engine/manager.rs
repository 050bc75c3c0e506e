// src/engine/manager.rs

//! Shared registry of directory watchers.
//!
//! A [`WatcherManager`] owns one [`WatchCore`] behind a mutex and the
//! background [`Runtime`] that performs its IO. Cloning the manager is cheap;
//! all clones share the same directory watchers, so two consumers watching
//! files in the same directory with the same options share one native
//! subscription.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::core::Attached;
use crate::engine::runtime::RuntimeMessage;
use crate::engine::{DirId, Runtime, WatchCore};
use crate::errors::{Result, WatchpackError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::types::{Clock, SystemClock, TimeInfoEntries, Timestamp};
use crate::watch::accuracy::AccuracyTracker;
use crate::watch::native::{NativeWatcherFactory, NotifyFactory};
use crate::watch::options::NormalizedOptions;
use crate::watch::watcher::{EventSink, Watcher, WatcherId};

/// Lock the core, recovering the state if a previous holder panicked.
pub(crate) fn lock_core(core: &Mutex<WatchCore>) -> MutexGuard<'_, WatchCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub(crate) struct ManagerShared {
    core: Arc<Mutex<WatchCore>>,
    tx: mpsc::UnboundedSender<RuntimeMessage>,
    fs: Arc<dyn FileSystem>,
}

impl ManagerShared {
    /// Called when a [`Watcher`] is closed or dropped.
    pub(crate) fn release(&self, id: WatcherId) {
        lock_core(&self.core).close_watcher(id);
        // After shutdown there is nothing left to unsubscribe.
        let _ = self.tx.send(RuntimeMessage::Flush);
    }

    fn flush(&self) -> Result<()> {
        self.tx
            .send(RuntimeMessage::Flush)
            .map_err(|_| WatchpackError::ManagerClosed)
    }
}

#[derive(Debug, Clone)]
pub struct WatcherManager {
    shared: Arc<ManagerShared>,
}

/// Configures the collaborators of a [`WatcherManager`].
#[derive(Debug, Default)]
pub struct ManagerBuilder {
    fs: Option<Arc<dyn FileSystem>>,
    factory: Option<Arc<dyn NativeWatcherFactory>>,
    clock: Option<Arc<dyn Clock>>,
    accuracy: Option<Arc<AccuracyTracker>>,
}

impl ManagerBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn native_factory(mut self, factory: Arc<dyn NativeWatcherFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a granularity estimate between managers.
    pub fn accuracy(mut self, accuracy: Arc<AccuracyTracker>) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Spawn the runtime and return the manager.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> WatcherManager {
        let fs = self.fs.unwrap_or_else(|| Arc::new(RealFileSystem));
        let factory = self.factory.unwrap_or_else(|| Arc::new(NotifyFactory));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let accuracy = self.accuracy.unwrap_or_default();

        let core = Arc::new(Mutex::new(WatchCore::new(accuracy, clock)));
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Runtime::new(
            Arc::clone(&core),
            rx,
            tx.downgrade(),
            Arc::clone(&fs),
            factory,
        );
        tokio::spawn(runtime.run());
        debug!("watcher manager started");

        WatcherManager {
            shared: Arc::new(ManagerShared { core, tx, fs }),
        }
    }
}

impl WatcherManager {
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Manager over the real filesystem and `notify`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Watch a single file. Events go to `sink`.
    pub fn watch_file(
        &self,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Watcher> {
        self.attach(path, |core| core.watch_file(path, options, start_time, sink))
    }

    /// Watch a directory recursively. Events go to `sink`.
    pub fn watch_directory(
        &self,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Watcher> {
        self.attach(path, |core| core.watch_directory(path, options, start_time, sink))
    }

    /// Watch `path` through the watcher of `directory`. `path` must be the
    /// directory itself or a direct child.
    pub fn watch_entry(
        &self,
        directory: &Path,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Watcher> {
        self.attach(path, |core| {
            core.watch_entry(directory, path, options, start_time, sink)
        })
    }

    fn attach(
        &self,
        path: &Path,
        attach: impl FnOnce(&mut WatchCore) -> Result<Attached>,
    ) -> Result<Watcher> {
        if self.shared.tx.is_closed() {
            return Err(WatchpackError::ManagerClosed);
        }
        let attached = attach(&mut lock_core(&self.shared.core))?;
        let watcher = Watcher::new(
            attached.id,
            path.to_path_buf(),
            attached.directory,
            attached.dir,
            Arc::downgrade(&self.shared),
        );
        self.shared.flush()?;
        Ok(watcher)
    }

    /// Force-close every directory watcher of `path`. Their handles stop
    /// receiving events.
    pub fn close_directory(&self, path: &Path) -> Result<()> {
        lock_core(&self.shared.core).close_directory_path(path);
        self.shared.flush()
    }

    pub fn directory_watcher_count(&self) -> usize {
        lock_core(&self.shared.core).directory_watcher_count()
    }

    /// Live handles watching exactly `path`, internal ones included.
    pub fn watcher_count(&self, path: &Path) -> usize {
        lock_core(&self.shared.core).watcher_count(path)
    }

    pub fn has_directory_watcher(&self, path: &Path) -> bool {
        lock_core(&self.shared.core).has_directory_watcher(path)
    }

    /// Merged time info of the directory watchers behind `watchers`.
    pub fn time_info_entries<'a>(
        &self,
        watchers: impl IntoIterator<Item = &'a Watcher>,
    ) -> TimeInfoEntries {
        let dirs: Vec<DirId> = watchers.into_iter().map(Watcher::dir_id).collect();
        lock_core(&self.shared.core).time_info_for(&dirs)
    }

    /// Current filesystem timestamp granularity in ms.
    pub fn granularity(&self) -> Timestamp {
        lock_core(&self.shared.core).accuracy().granularity()
    }

    pub fn file_system(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.shared.fs)
    }
}

impl Default for WatcherManager {
    fn default() -> Self {
        Self::new()
    }
}
