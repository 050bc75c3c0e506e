// src/engine/core.rs

//! Pure core of the watcher engine.
//!
//! [`WatchCore`] owns every directory watcher and every handle. It consumes
//! [`Input`]s and produces:
//! - events delivered to handles
//! - a list of [`Command`]s describing the IO the shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - native subscriptions
//! - stats, directory reads and existence checks
//! - feeding results back as [`Input`]s
//!
//! The core has no channels of its own apart from the consumer sinks and
//! performs no IO, so it is unit tested with a manual clock and hand-fed
//! results.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::engine::directory::{DirectoryEntry, DirectoryWatcher};
use crate::engine::{Command, DirId, Input};
use crate::errors::{Result, WatchpackError};
use crate::types::{Clock, Timestamp, TimeInfo, TimeInfoEntries, merge_time_info};
use crate::watch::accuracy::AccuracyTracker;
use crate::watch::options::{NormalizedOptions, OptionsKey};
use crate::watch::path_utils::{PathKey, fold, parent_dir};
use crate::watch::watcher::{EventSink, WatcherEvent, WatcherEventKind, WatcherId};

/// Whether an event at `time` is news for a handle created with `start`.
///
/// Without a start time only non-initial events pass.
pub(crate) fn check_start_time(start: Option<Timestamp>, time: Timestamp, initial: bool) -> bool {
    match start {
        None => !initial,
        Some(start) => start <= time,
    }
}

/// Who receives the events of a handle.
#[derive(Debug)]
pub(crate) enum Listener {
    External(EventSink),
    /// Handle on a subdirectory, owned by the parent's nested watching.
    Nested { parent: DirId },
    /// Handle watching for a missing directory to reappear.
    Parent { child: DirId },
}

#[derive(Debug)]
pub(crate) struct HandleEntry {
    pub dir: DirId,
    pub path: PathBuf,
    pub start_time: Option<Timestamp>,
    pub listener: Listener,
}

/// Where a new handle ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attached {
    pub id: WatcherId,
    pub dir: DirId,
    pub directory: PathBuf,
}

/// Registry of directory watchers plus all handles.
#[derive(Debug)]
pub struct WatchCore {
    pub(crate) dirs: HashMap<DirId, DirectoryWatcher>,
    registry: HashMap<(PathBuf, OptionsKey), DirId>,
    /// Exact directory path to every watcher of it (one per option set).
    /// Native subscriptions are per exact path, so routing never folds case.
    by_path: HashMap<PathBuf, Vec<DirId>>,
    pub(crate) handles: HashMap<WatcherId, HandleEntry>,
    next_dir: u64,
    next_watcher: u64,
    pub(crate) accuracy: Arc<AccuracyTracker>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) commands: Vec<Command>,
    /// Events for internal listeners, applied by [`WatchCore::pump`].
    internal: VecDeque<(WatcherId, WatcherEventKind)>,
}

impl WatchCore {
    pub fn new(accuracy: Arc<AccuracyTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dirs: HashMap::new(),
            registry: HashMap::new(),
            by_path: HashMap::new(),
            handles: HashMap::new(),
            next_dir: 0,
            next_watcher: 0,
            accuracy,
            clock,
            commands: Vec::new(),
            internal: VecDeque::new(),
        }
    }

    pub fn accuracy(&self) -> &Arc<AccuracyTracker> {
        &self.accuracy
    }

    /// Commands produced since the last call.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Watch a single file through its parent directory.
    pub fn watch_file(
        &mut self,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Attached> {
        let Some(directory) = parent_dir(path) else {
            return Err(WatchpackError::invalid_path(path, "path has no parent directory"));
        };
        let directory = directory.to_path_buf();
        Ok(self.attach_external(&directory, path, options, start_time, sink))
    }

    /// Watch a directory and, recursively, everything below it.
    pub fn watch_directory(
        &mut self,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Attached> {
        if path.as_os_str().is_empty() {
            return Err(WatchpackError::invalid_path(path, "empty path"));
        }
        Ok(self.attach_external(path, path, options, start_time, sink))
    }

    /// Attach to the watcher of `directory` for `path`, which must be that
    /// directory or one of its direct children.
    pub fn watch_entry(
        &mut self,
        directory: &Path,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Result<Attached> {
        if path != directory && parent_dir(path) != Some(directory) {
            return Err(WatchpackError::invalid_path(
                path,
                format!("not {directory:?} or a direct child of it"),
            ));
        }
        Ok(self.attach_external(directory, path, options, start_time, sink))
    }

    fn attach_external(
        &mut self,
        directory: &Path,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        sink: EventSink,
    ) -> Attached {
        let attached = self.attach(directory, path, options, start_time, Listener::External(sink));
        self.pump();
        attached
    }

    pub(crate) fn attach(
        &mut self,
        directory: &Path,
        path: &Path,
        options: &Arc<NormalizedOptions>,
        start_time: Option<Timestamp>,
        listener: Listener,
    ) -> Attached {
        let dir = self.get_or_create(directory, options);
        let id = WatcherId(self.next_watcher);
        self.next_watcher += 1;
        self.handles.insert(
            id,
            HandleEntry {
                dir,
                path: path.to_path_buf(),
                start_time,
                listener,
            },
        );

        let is_self = path == directory;
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.watchers.entry(PathKey::new(path)).or_default().push(id);
            d.refs += 1;
        }
        if is_self {
            self.set_nested_watching(dir, true);
        }
        self.emit_on_attach(dir, id, path, start_time);

        Attached {
            id,
            dir,
            directory: directory.to_path_buf(),
        }
    }

    /// Tell a new handle what the watcher already knows.
    fn emit_on_attach(
        &mut self,
        dir: DirId,
        id: WatcherId,
        path: &Path,
        start_time: Option<Timestamp>,
    ) {
        use crate::types::Cause;

        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        let is_self = path == d.path;

        let known = if is_self {
            let safe = d
                .files
                .values()
                .filter_map(|rec| rec.safe_time(&self.accuracy))
                .fold(d.last_watch_event, Timestamp::max);
            (safe > 0).then_some((safe, safe))
        } else {
            d.files.get(path).and_then(|rec| {
                let safe = rec.safe_time(&self.accuracy)?;
                Some((safe, rec.modified_time.unwrap_or(safe)))
            })
        };

        if let Some((safe, mtime)) = known {
            if start_time.is_some_and(|start| safe >= start) {
                self.emit(id, WatcherEventKind::Change {
                    path: path.to_path_buf(),
                    mtime: Some(mtime),
                    cause: Cause::OutdatedOnAttach,
                    initial: true,
                });
            }
        } else if d.initial_scan {
            if d.initial_scan_removed.contains(path) {
                self.emit(id, WatcherEventKind::Remove {
                    cause: Cause::ScanMissing,
                });
            }
        } else if !is_self
            && !d.directories.contains_key(path)
            && check_start_time(start_time, d.initial_scan_finished.unwrap_or(0), false)
        {
            self.emit(id, WatcherEventKind::InitialMissing {
                cause: Cause::MissingOnAttach,
            });
        }
    }

    fn get_or_create(&mut self, directory: &Path, options: &Arc<NormalizedOptions>) -> DirId {
        let key = (directory.to_path_buf(), options.key().clone());
        if let Some(dir) = self.registry.get(&key) {
            return *dir;
        }

        let dir = DirId(self.next_dir);
        self.next_dir += 1;
        self.dirs
            .insert(dir, DirectoryWatcher::new(directory.to_path_buf(), Arc::clone(options)));
        self.registry.insert(key, dir);
        self.by_path.entry(directory.to_path_buf()).or_default().push(dir);
        debug!(path = ?directory, dir = dir.0, "directory watcher created");

        self.create_native_watcher(dir);
        self.do_scan(dir, true);
        dir
    }

    /// Release one handle. Unknown or already closed handles are ignored.
    pub fn close_watcher(&mut self, id: WatcherId) {
        self.release_handle(id);
        self.pump();
    }

    pub(crate) fn release_handle(&mut self, id: WatcherId) {
        let Some(entry) = self.handles.remove(&id) else {
            return;
        };
        let Some(d) = self.dirs.get_mut(&entry.dir) else {
            return;
        };

        let key = fold(&entry.path);
        let mut last_self_handle = false;
        if let Some(ids) = d.watchers.get_mut(key.as_str()) {
            ids.retain(|w| *w != id);
            if ids.is_empty() {
                d.watchers.remove(key.as_str());
                last_self_handle = entry.path == d.path;
            }
        }
        d.refs = d.refs.saturating_sub(1);
        let unreferenced = d.refs == 0;

        if last_self_handle {
            self.set_nested_watching(entry.dir, false);
        }
        if unreferenced {
            self.close_directory(entry.dir);
        }
    }

    /// Close every directory watcher of `path`, whatever its options.
    pub fn close_directory_path(&mut self, path: &Path) {
        let dirs = self.dirs_at(path);
        for dir in dirs {
            self.close_directory(dir);
        }
        self.pump();
    }

    pub(crate) fn close_directory(&mut self, dir: DirId) {
        let Some(d) = self.dirs.remove(&dir) else {
            return;
        };
        self.registry.remove(&(d.path.clone(), d.options.key().clone()));
        if let Some(ids) = self.by_path.get_mut(&d.path) {
            ids.retain(|other| *other != dir);
            if ids.is_empty() {
                self.by_path.remove(&d.path);
            }
        }
        if d.subscribed {
            self.commands.push(Command::Unsubscribe {
                path: d.path.clone(),
                poll: d.options.poll,
            });
        }
        debug!(path = ?d.path, dir = dir.0, "directory watcher closed");

        for id in d.all_handles() {
            self.handles.remove(&id);
        }
        if let Some(handle) = d.parent_watcher {
            self.release_handle(handle);
        }
        for entry in d.directories.values() {
            if let DirectoryEntry::Nested(handle) = entry {
                self.release_handle(*handle);
            }
        }
    }

    /// Apply one input from the IO shell.
    pub fn step(&mut self, input: Input) {
        match input {
            Input::Native { path, kind } => self.route_native(path, kind),
            Input::Rescan => {
                let subscribed: Vec<DirId> = self
                    .dirs
                    .iter()
                    .filter(|(_, d)| d.subscribed)
                    .map(|(id, _)| *id)
                    .collect();
                for dir in subscribed {
                    self.do_scan(dir, false);
                }
            }
            Input::NativeError { path, error } => {
                for dir in self.dirs_at(&path) {
                    let error = io::Error::new(error.kind(), error.to_string());
                    self.on_watcher_error(dir, &error);
                }
            }
            Input::SubscribeFailed { dir, error } => self.on_subscribe_failed(dir, &error),
            Input::StatDone {
                dir,
                path,
                cause,
                result,
            } => self.on_stat_done(dir, path, cause, result),
            Input::ScanDone {
                dir,
                initial,
                result,
            } => self.on_scan_done(dir, initial, result),
            Input::ExistsChecked { dir, exists } => self.on_exists_checked(dir, exists),
        }
        self.pump();
    }

    fn dirs_at(&self, path: &Path) -> Vec<DirId> {
        self.by_path.get(path).cloned().unwrap_or_default()
    }

    fn route_native(&mut self, path: PathBuf, kind: crate::types::NativeEventKind) {
        if let Some(parent) = parent_dir(&path) {
            for dir in self.dirs_at(parent) {
                self.on_native_event(dir, path.clone(), kind);
            }
        }
        // An event on a watched directory itself may mean it went away.
        for dir in self.dirs_at(&path) {
            if self.dirs.get(&dir).is_some_and(|d| d.subscribed) {
                self.commands.push(Command::CheckExists {
                    dir,
                    path: path.clone(),
                });
            }
        }
    }

    pub(crate) fn emit(&mut self, id: WatcherId, kind: WatcherEventKind) {
        let Some(entry) = self.handles.get(&id) else {
            return;
        };
        match &entry.listener {
            Listener::External(sink) => {
                // A consumer that dropped its receiver simply stops listening.
                let _ = sink.send(WatcherEvent { watcher: id, kind });
            }
            Listener::Nested { .. } | Listener::Parent { .. } => {
                self.internal.push_back((id, kind));
            }
        }
    }

    pub(crate) fn emit_if(
        &mut self,
        id: WatcherId,
        kind: WatcherEventKind,
        filter: impl Fn(Option<Timestamp>) -> bool,
    ) {
        let Some(entry) = self.handles.get(&id) else {
            return;
        };
        if filter(entry.start_time) {
            self.emit(id, kind);
        }
    }

    /// Emit `kind` to every handle of `dir` watching `path`.
    pub(crate) fn emit_at(
        &mut self,
        dir: DirId,
        path: &Path,
        kind: WatcherEventKind,
        filter: impl Fn(Option<Timestamp>) -> bool,
    ) {
        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        for id in d.handles_at(path) {
            self.emit_if(id, kind.clone(), &filter);
        }
    }

    /// Deliver queued events to nested and parent-directory listeners.
    pub(crate) fn pump(&mut self) {
        while let Some((id, kind)) = self.internal.pop_front() {
            let Some(entry) = self.handles.get(&id) else {
                continue;
            };
            match entry.listener {
                Listener::Nested { parent } => self.forward_nested(parent, kind),
                Listener::Parent { child } => self.on_parent_signal(child, kind),
                Listener::External(_) => {}
            }
        }
    }

    /// Time info of a single directory watcher, including nested children.
    fn dir_time_info(&self, dir: DirId) -> TimeInfoEntries {
        let mut out = TimeInfoEntries::new();
        let Some(d) = self.dirs.get(&dir) else {
            return out;
        };
        let mut self_time = 0;
        for (path, rec) in &d.files {
            match rec.safe_time(&self.accuracy) {
                Some(safe) => {
                    self_time = self_time.max(safe);
                    let mtime = rec.modified_time.unwrap_or(safe);
                    out.insert(path.clone(), Some(TimeInfo::file(safe, mtime)));
                }
                None => {
                    self_time = self_time.max(rec.accuracy_time);
                    out.insert(path.clone(), None);
                }
            }
        }

        if d.nested_watching {
            for entry in d.directories.values() {
                let DirectoryEntry::Nested(handle) = entry else {
                    continue;
                };
                let Some(child) = self.handles.get(handle).map(|h| h.dir) else {
                    continue;
                };
                for (path, info) in self.dir_time_info(child) {
                    if let Some(info) = info {
                        self_time = self_time.max(info.safe_time);
                    }
                    out.insert(path, info);
                }
            }
            out.insert(d.path.clone(), Some(TimeInfo::directory(self_time)));
        }

        for key in d.watchers.keys() {
            out.entry(key.original().to_path_buf()).or_insert(None);
        }
        out
    }

    /// Merged time info of the given directory watchers.
    pub fn time_info_for(&self, dirs: &[DirId]) -> TimeInfoEntries {
        let mut seen = HashSet::new();
        let mut out = TimeInfoEntries::new();
        for dir in dirs {
            if seen.insert(*dir) {
                merge_time_info(&mut out, self.dir_time_info(*dir));
            }
        }
        out
    }

    pub fn directory_watcher_count(&self) -> usize {
        self.dirs.len()
    }

    /// Live handles watching exactly `path`.
    pub fn watcher_count(&self, path: &Path) -> usize {
        self.handles.values().filter(|h| h.path == path).count()
    }

    pub fn has_directory_watcher(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn directory(&self, dir: DirId) -> Option<&DirectoryWatcher> {
        self.dirs.get(&dir)
    }
}
