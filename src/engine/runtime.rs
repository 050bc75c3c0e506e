// src/engine/runtime.rs

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::manager::lock_core;
use crate::engine::{Command, Input, ScanEntry, WatchCore};
use crate::fs::FileSystem;
use crate::watch::native::{NativeSender, NativeSignal, NativeWatcher, NativeWatcherFactory};

/// Messages understood by the runtime loop.
#[derive(Debug)]
pub(crate) enum RuntimeMessage {
    /// Result of IO performed on behalf of the core.
    Input(Input),
    /// The core was changed from outside; execute its pending commands.
    Flush,
}

/// Performs the IO requested by a [`WatchCore`].
///
/// This is a pure IO shell around the core, which contains all the watching
/// semantics. It owns the native backends (one per poll setting), reference
/// counts native subscriptions per directory, and runs stats and directory
/// reads on the blocking pool. Results come back as [`Input`]s.
pub struct Runtime {
    core: Arc<Mutex<WatchCore>>,
    rx: mpsc::UnboundedReceiver<RuntimeMessage>,
    tx: mpsc::WeakUnboundedSender<RuntimeMessage>,
    native_tx: NativeSender,
    native_rx: mpsc::UnboundedReceiver<NativeSignal>,
    fs: Arc<dyn FileSystem>,
    factory: Arc<dyn NativeWatcherFactory>,
    backends: HashMap<Option<Duration>, Box<dyn NativeWatcher>>,
    subscriptions: HashMap<(PathBuf, Option<Duration>), usize>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("factory", &self.factory)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub(crate) fn new(
        core: Arc<Mutex<WatchCore>>,
        rx: mpsc::UnboundedReceiver<RuntimeMessage>,
        tx: mpsc::WeakUnboundedSender<RuntimeMessage>,
        fs: Arc<dyn FileSystem>,
        factory: Arc<dyn NativeWatcherFactory>,
    ) -> Self {
        let (native_tx, native_rx) = mpsc::unbounded_channel();
        Self {
            core,
            rx,
            tx,
            native_tx,
            native_rx,
            fs,
            factory,
            backends: HashMap::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Main event loop.
    ///
    /// Runs until every manager handle is gone. Dropping the runtime drops
    /// the native backends, which ends all subscriptions.
    pub async fn run(mut self) {
        debug!("watcher runtime started");

        loop {
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(RuntimeMessage::Input(input)) => self.apply(input),
                    Some(RuntimeMessage::Flush) => self.flush(),
                    None => break,
                },
                Some(signal) = self.native_rx.recv() => self.on_native(signal),
            }
        }

        info!(
            subscriptions = self.subscriptions.len(),
            "watcher runtime stopped"
        );
    }

    fn on_native(&mut self, signal: NativeSignal) {
        match signal {
            NativeSignal::Event { kind, paths } => {
                for path in paths {
                    self.apply(Input::Native { path, kind });
                }
            }
            NativeSignal::Rescan => {
                debug!("native backend lost events; rescanning");
                self.apply(Input::Rescan);
            }
            NativeSignal::Error { paths, error } => {
                if paths.is_empty() {
                    warn!(error = %error, "native watcher error without a path");
                }
                for path in paths {
                    let error = io::Error::new(error.kind(), error.to_string());
                    self.apply(Input::NativeError { path, error });
                }
            }
        }
    }

    fn apply(&mut self, input: Input) {
        let commands = {
            let mut core = lock_core(&self.core);
            core.step(input);
            core.take_commands()
        };
        self.execute(commands);
    }

    fn flush(&mut self) {
        let commands = lock_core(&self.core).take_commands();
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        let mut queue = VecDeque::from(commands);
        while let Some(command) = queue.pop_front() {
            match command {
                Command::Subscribe { dir, path, poll } => {
                    if let Err(error) = self.subscribe(&path, poll) {
                        debug!(path = ?path, error = %error, "native subscription failed");
                        let more = {
                            let mut core = lock_core(&self.core);
                            core.step(Input::SubscribeFailed { dir, error });
                            core.take_commands()
                        };
                        queue.extend(more);
                    }
                }
                Command::Unsubscribe { path, poll } => self.unsubscribe(&path, poll),
                Command::Stat { dir, path, cause } => {
                    self.spawn_io(move |fs| {
                        let result = fs.metadata(&path);
                        Input::StatDone {
                            dir,
                            path,
                            cause,
                            result,
                        }
                    });
                }
                Command::Scan { dir, path, initial } => {
                    let fs = Arc::clone(&self.fs);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = scan_directory(fs, path).await;
                        if let Some(tx) = tx.upgrade() {
                            let _ = tx.send(RuntimeMessage::Input(Input::ScanDone {
                                dir,
                                initial,
                                result,
                            }));
                        }
                    });
                }
                Command::CheckExists { dir, path } => {
                    self.spawn_io(move |fs| Input::ExistsChecked {
                        dir,
                        exists: fs.exists(&path),
                    });
                }
            }
        }
    }

    /// Run blocking filesystem work and feed its result back into the loop.
    fn spawn_io<F>(&self, work: F)
    where
        F: FnOnce(&dyn FileSystem) -> Input + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        let tx = self.tx.clone();
        tokio::task::spawn_blocking(move || {
            let input = work(fs.as_ref());
            // Without a live sender the runtime is shutting down.
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(RuntimeMessage::Input(input));
            }
        });
    }

    fn subscribe(&mut self, path: &Path, poll: Option<Duration>) -> io::Result<()> {
        let key = (path.to_path_buf(), poll);
        if let Some(count) = self.subscriptions.get_mut(&key) {
            *count += 1;
            return Ok(());
        }

        let backend = match self.backends.entry(poll) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let created = self
                    .factory
                    .create(poll, self.native_tx.clone())
                    .map_err(io::Error::other)?;
                debug!(poll = ?poll, "native backend created");
                entry.insert(created)
            }
        };
        backend.subscribe(path)?;
        self.subscriptions.insert(key, 1);
        debug!(path = ?path, poll = ?poll, "subscribed to native events");
        Ok(())
    }

    fn unsubscribe(&mut self, path: &Path, poll: Option<Duration>) {
        let key = (path.to_path_buf(), poll);
        let Some(count) = self.subscriptions.get_mut(&key) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.subscriptions.remove(&key);
        if let Some(backend) = self.backends.get_mut(&poll) {
            backend.unsubscribe(path);
        }
        debug!(path = ?path, poll = ?poll, "unsubscribed from native events");
    }
}

/// Read a directory and lstat its entries concurrently, sorted by path.
async fn scan_directory(fs: Arc<dyn FileSystem>, dir: PathBuf) -> io::Result<Vec<ScanEntry>> {
    let names = {
        let fs = Arc::clone(&fs);
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || fs.read_dir(&dir))
            .await
            .map_err(io::Error::other)??
    };

    let mut stats = JoinSet::new();
    for name in names {
        let fs = Arc::clone(&fs);
        let path = dir.join(name);
        stats.spawn_blocking(move || {
            let result = fs.metadata(&path);
            ScanEntry { path, result }
        });
    }

    let mut entries = Vec::with_capacity(stats.len());
    while let Some(joined) = stats.join_next().await {
        entries.push(joined.map_err(io::Error::other)?);
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::EntryKind;
    use crate::fs::mock::MockFileSystem;

    #[tokio::test]
    async fn scan_lists_entries_sorted_with_their_metadata() {
        let fs = MockFileSystem::new();
        fs.add_file("/proj/b.txt", 2000);
        fs.add_file("/proj/a.txt", 1000);
        fs.add_dir("/proj/sub");

        let entries = scan_directory(Arc::new(fs), PathBuf::from("/proj")).await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec![
            PathBuf::from("/proj/a.txt"),
            PathBuf::from("/proj/b.txt"),
            PathBuf::from("/proj/sub"),
        ]);
        assert_eq!(entries[2].result.as_ref().unwrap().kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn scan_of_missing_directory_fails() {
        let fs = Arc::new(MockFileSystem::new());
        let err = scan_directory(fs, PathBuf::from("/nope")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
