// src/engine/directory.rs

//! Watching state of a single directory.
//!
//! A [`DirectoryWatcher`] tracks the files and subdirectories directly inside
//! one directory. The transitions live in an `impl WatchCore` block because
//! most of them reach across watchers: nested child watchers, the
//! parent-directory watch used while the directory is missing, and the
//! handles that receive events.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::core::{Listener, WatchCore, check_start_time};
use crate::engine::{Command, DirId, ScanEntry};
use crate::errors::is_transient;
use crate::fs::{EntryKind, Metadata};
use crate::types::{Cause, NativeEventKind, Timestamp};
use crate::watch::accuracy::AccuracyTracker;
use crate::watch::options::NormalizedOptions;
use crate::watch::path_utils::{PathKey, fold, is_root, parent_dir};
use crate::watch::watcher::{WatcherEventKind, WatcherId};

/// What is known about one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileRecord {
    /// No silent change can have happened before this point.
    pub accuracy_time: Timestamp,
    /// `None` marks a deleted file that is still tracked.
    pub modified_time: Option<Timestamp>,
}

impl FileRecord {
    pub(crate) fn safe_time(&self, accuracy: &AccuracyTracker) -> Option<Timestamp> {
        self.modified_time
            .map(|mtime| self.accuracy_time.max(accuracy.pad(mtime)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectoryEntry {
    /// Known to exist, not watched.
    Present,
    /// Watched through a handle on a child directory watcher.
    Nested(WatcherId),
}

#[derive(Debug)]
pub struct DirectoryWatcher {
    pub(crate) path: PathBuf,
    pub(crate) options: Arc<NormalizedOptions>,
    pub(crate) files: BTreeMap<PathBuf, FileRecord>,
    pub(crate) directories: BTreeMap<PathBuf, DirectoryEntry>,
    pub(crate) watchers: HashMap<PathKey, Vec<WatcherId>>,
    pub(crate) initial_scan: bool,
    pub(crate) initial_scan_removed: BTreeSet<PathBuf>,
    pub(crate) initial_scan_finished: Option<Timestamp>,
    pub(crate) nested_watching: bool,
    pub(crate) parent_watcher: Option<WatcherId>,
    pub(crate) refs: usize,
    /// Stats in flight, keyed by path. `true` means another event arrived
    /// meanwhile and the result must be re-checked.
    pub(crate) active_events: HashMap<PathBuf, bool>,
    pub(crate) subscribed: bool,
    pub(crate) scanning: bool,
    /// A scan was requested while one was running; the flag is `initial`.
    pub(crate) scan_again: Option<bool>,
    pub(crate) last_watch_event: Timestamp,
}

impl DirectoryWatcher {
    pub(crate) fn new(path: PathBuf, options: Arc<NormalizedOptions>) -> Self {
        Self {
            path,
            options,
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            watchers: HashMap::new(),
            initial_scan: true,
            initial_scan_removed: BTreeSet::new(),
            initial_scan_finished: None,
            nested_watching: false,
            parent_watcher: None,
            refs: 0,
            active_events: HashMap::new(),
            subscribed: false,
            scanning: false,
            scan_again: None,
            last_watch_event: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn is_initial_scan(&self) -> bool {
        self.initial_scan
    }

    pub fn is_nested_watching(&self) -> bool {
        self.nested_watching
    }

    pub(crate) fn handles_at(&self, path: &Path) -> Vec<WatcherId> {
        self.watchers
            .get(fold(path).as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn all_handles(&self) -> Vec<WatcherId> {
        self.watchers.values().flatten().copied().collect()
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.options.ignore.is_ignored(path)
    }
}

fn tracks_as_file(meta: &Metadata) -> bool {
    matches!(meta.kind, EntryKind::File | EntryKind::Symlink)
}

impl WatchCore {
    pub(crate) fn create_native_watcher(&mut self, dir: DirId) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.subscribed {
            return;
        }
        d.subscribed = true;
        let command = Command::Subscribe {
            dir,
            path: d.path.clone(),
            poll: d.options.poll,
        };
        self.commands.push(command);
    }

    pub(crate) fn release_native_watcher(&mut self, dir: DirId) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if !d.subscribed {
            return;
        }
        d.subscribed = false;
        let command = Command::Unsubscribe {
            path: d.path.clone(),
            poll: d.options.poll,
        };
        self.commands.push(command);
    }

    pub(crate) fn do_scan(&mut self, dir: DirId, initial: bool) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.scanning {
            d.scan_again = Some(match d.scan_again {
                Some(pending) => pending && initial,
                None => initial,
            });
            return;
        }
        d.scanning = true;
        let command = Command::Scan {
            dir,
            path: d.path.clone(),
            initial,
        };
        self.commands.push(command);
    }

    pub(crate) fn on_scan_done(
        &mut self,
        dir: DirId,
        initial: bool,
        result: io::Result<Vec<ScanEntry>>,
    ) {
        let now = self.clock.now();
        let Some(d) = self.dirs.get(&dir) else {
            return;
        };

        let entries = match result {
            Ok(entries) => entries,
            Err(err) => {
                let unavailable =
                    is_transient(&err) || err.kind() == io::ErrorKind::NotADirectory;
                if unavailable {
                    debug!(path = ?d.path, error = %err, "directory not readable; waiting for it");
                    self.on_directory_removed(dir, Cause::DirectoryRemoved);
                } else {
                    warn!(path = ?d.path, error = %err, "failed to scan directory");
                }
                let waiting = match self.dirs.get_mut(&dir) {
                    Some(d) if d.initial_scan => {
                        d.initial_scan = false;
                        d.initial_scan_finished = Some(now);
                        d.all_handles()
                    }
                    _ => Vec::new(),
                };
                for id in waiting {
                    let missing = WatcherEventKind::InitialMissing {
                        cause: Cause::ParentMissing,
                    };
                    self.emit_if(id, missing, |start| check_start_time(start, now, false));
                }
                self.finish_scan(dir, now);
                return;
            }
        };

        let listed: BTreeSet<&Path> = entries.iter().map(|e| e.path.as_path()).collect();
        let gone: Vec<PathBuf> = d
            .files
            .iter()
            .filter(|(_, rec)| rec.modified_time.is_some())
            .map(|(p, _)| p)
            .chain(d.directories.keys())
            .filter(|p| !listed.contains(p.as_path()))
            .cloned()
            .collect();
        for path in gone {
            self.set_missing(dir, path, initial, Cause::ScanMissing);
        }

        for entry in entries {
            let Some(d) = self.dirs.get(&dir) else {
                return;
            };
            if d.is_ignored(&entry.path) {
                continue;
            }
            match entry.result {
                Err(err) if is_transient(&err) => {
                    self.set_missing(dir, entry.path, initial, Cause::ScanMissing);
                }
                Err(err) => {
                    warn!(path = ?entry.path, error = %err, "failed to stat entry during scan");
                }
                Ok(meta) if meta.is_dir() => {
                    self.set_directory(dir, entry.path, meta.mtime(), initial, Cause::ScanDirectory);
                }
                Ok(meta) if tracks_as_file(&meta) => {
                    if let Some(modified) = meta.modified {
                        self.accuracy.observe(modified);
                    }
                    self.set_file_time(dir, entry.path, meta.mtime(), initial, true, Cause::ScanFile);
                }
                Ok(_) => {}
            }
        }

        self.finish_scan(dir, now);
    }

    fn finish_scan(&mut self, dir: DirId, now: Timestamp) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        d.scanning = false;
        if let Some(initial) = d.scan_again.take() {
            self.do_scan(dir, initial);
            return;
        }
        if !d.initial_scan {
            return;
        }
        d.initial_scan = false;
        d.initial_scan_finished = Some(now);

        let missing: Vec<WatcherId> = d
            .watchers
            .iter()
            .filter(|(key, _)| {
                let path = key.original();
                path != d.path && !d.files.contains_key(path) && !d.directories.contains_key(path)
            })
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        for id in missing {
            self.emit(id, WatcherEventKind::InitialMissing {
                cause: Cause::MissingInInitialScan,
            });
        }
    }

    pub(crate) fn set_file_time(
        &mut self,
        dir: DirId,
        path: PathBuf,
        mtime: Timestamp,
        initial: bool,
        ignore_when_equal: bool,
        cause: Cause,
    ) {
        let now = self.clock.now();
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.is_ignored(&path) {
            return;
        }

        let old = d.files.get(&path).and_then(|rec| rec.modified_time);
        let (accuracy_time, effective) = if initial {
            let t = now.min(mtime);
            (t, self.accuracy.pad(t))
        } else {
            // Same mtime and old enough: only attributes changed.
            if old == Some(mtime) && self.accuracy.pad(mtime) < now {
                return;
            }
            (now, now)
        };
        if ignore_when_equal && old == Some(mtime) {
            return;
        }

        let replaced_dir = d.directories.remove(&path);
        d.files.insert(
            path.clone(),
            FileRecord {
                accuracy_time,
                modified_time: Some(mtime),
            },
        );
        let self_path = d.path.clone();
        if let Some(DirectoryEntry::Nested(handle)) = replaced_dir {
            self.release_handle(handle);
        }

        let file_change = WatcherEventKind::Change {
            path: path.clone(),
            mtime: Some(mtime),
            cause,
            initial,
        };
        if old.is_none() {
            self.emit_at(dir, &path, file_change, |start| {
                !initial || check_start_time(start, effective, initial)
            });
        } else if !initial {
            self.emit_at(dir, &path, file_change, |_| true);
        }

        let dir_change = WatcherEventKind::Change {
            path,
            mtime: Some(effective),
            cause,
            initial,
        };
        self.emit_at(dir, &self_path, dir_change, |start| {
            !initial || check_start_time(start, effective, initial)
        });
    }

    pub(crate) fn set_missing(&mut self, dir: DirId, path: PathBuf, initial: bool, cause: Cause) {
        let now = self.clock.now();
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.initial_scan {
            d.initial_scan_removed.insert(path.clone());
        }

        let mut removed = false;
        let mut nested = None;
        if let Some(entry) = d.directories.remove(&path) {
            removed = true;
            if let DirectoryEntry::Nested(handle) = entry {
                nested = Some(handle);
            }
        }
        if let Some(rec) = d.files.get_mut(&path) {
            if rec.modified_time.is_some() {
                rec.accuracy_time = now;
                rec.modified_time = None;
                removed = true;
            }
        }
        let self_path = d.path.clone();
        if let Some(handle) = nested {
            self.release_handle(handle);
        }
        if !removed {
            return;
        }

        self.emit_at(dir, &path, WatcherEventKind::Remove { cause }, |_| true);
        if !initial {
            let change = WatcherEventKind::Change {
                path,
                mtime: None,
                cause,
                initial: false,
            };
            self.emit_at(dir, &self_path, change, |_| true);
        }
    }

    pub(crate) fn set_directory(
        &mut self,
        dir: DirId,
        path: PathBuf,
        mtime: Timestamp,
        initial: bool,
        cause: Cause,
    ) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        let self_path = d.path.clone();
        if path == self_path {
            if !initial {
                let change = WatcherEventKind::Change {
                    path,
                    mtime: Some(mtime),
                    cause,
                    initial: false,
                };
                self.emit_at(dir, &self_path, change, |_| true);
            }
            return;
        }
        if d.directories.contains_key(&path) || d.is_ignored(&path) {
            return;
        }

        d.files.remove(&path);
        d.directories.insert(path.clone(), DirectoryEntry::Present);
        if d.nested_watching {
            if let Some(handle) = self.create_nested_watcher(dir, &path) {
                if let Some(d) = self.dirs.get_mut(&dir) {
                    d.directories.insert(path.clone(), DirectoryEntry::Nested(handle));
                }
            }
        }

        if !initial {
            let change = WatcherEventKind::Change {
                path: path.clone(),
                mtime: Some(mtime),
                cause,
                initial: false,
            };
            self.emit_at(dir, &self_path, change, |_| true);
        }
        let change = WatcherEventKind::Change {
            path: path.clone(),
            mtime: Some(mtime),
            cause,
            initial,
        };
        self.emit_at(dir, &path, change, |start| {
            !initial || check_start_time(start, mtime, false)
        });
    }

    fn create_nested_watcher(&mut self, parent: DirId, path: &Path) -> Option<WatcherId> {
        let options = Arc::clone(&self.dirs.get(&parent)?.options);
        let attached = self.attach(path, path, &options, Some(1), Listener::Nested { parent });
        Some(attached.id)
    }

    pub(crate) fn set_nested_watching(&mut self, dir: DirId, flag: bool) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.nested_watching == flag {
            return;
        }
        d.nested_watching = flag;
        debug!(path = ?d.path, nested = flag, "nested watching toggled");

        if flag {
            let subdirs: Vec<PathBuf> = d.directories.keys().cloned().collect();
            for path in subdirs {
                if let Some(handle) = self.create_nested_watcher(dir, &path) {
                    if let Some(d) = self.dirs.get_mut(&dir) {
                        d.directories.insert(path, DirectoryEntry::Nested(handle));
                    }
                }
            }
        } else {
            let nested: Vec<WatcherId> = d
                .directories
                .values_mut()
                .filter_map(|entry| match std::mem::replace(entry, DirectoryEntry::Present) {
                    DirectoryEntry::Nested(handle) => Some(handle),
                    DirectoryEntry::Present => None,
                })
                .collect();
            for handle in nested {
                self.release_handle(handle);
            }
        }
    }

    /// Re-emit a nested child's directory-level change on this directory,
    /// filtered by each handle's start time.
    pub(crate) fn forward_nested(&mut self, parent: DirId, kind: WatcherEventKind) {
        let WatcherEventKind::Change { mtime, initial, .. } = &kind else {
            return;
        };
        let (mtime, initial) = (*mtime, *initial);
        let Some(d) = self.dirs.get(&parent) else {
            return;
        };
        let self_path = d.path.clone();
        self.emit_at(parent, &self_path, kind, |start| match mtime {
            Some(mtime) => check_start_time(start, mtime, initial),
            None => !initial,
        });
    }

    pub(crate) fn on_native_event(&mut self, dir: DirId, path: PathBuf, kind: NativeEventKind) {
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.is_ignored(&path) {
            return;
        }
        match d.active_events.get_mut(&path) {
            Some(recheck) => *recheck = true,
            None => {
                d.active_events.insert(path.clone(), false);
                self.commands.push(Command::Stat {
                    dir,
                    path,
                    cause: kind.into(),
                });
            }
        }
    }

    pub(crate) fn on_stat_done(
        &mut self,
        dir: DirId,
        path: PathBuf,
        cause: Cause,
        result: io::Result<Metadata>,
    ) {
        let now = self.clock.now();
        let Some(d) = self.dirs.get_mut(&dir) else {
            return;
        };
        if d.active_events.get(&path) == Some(&true) {
            d.active_events.insert(path.clone(), false);
            self.commands.push(Command::Stat { dir, path, cause });
            return;
        }
        d.active_events.remove(&path);
        d.last_watch_event = now;

        match result {
            Err(err) => {
                if !is_transient(&err) {
                    warn!(path = ?path, error = %err, "failed to stat changed entry");
                } else if path.file_name() == d.path.file_name() {
                    // May be the watched directory itself going away.
                    let command = Command::CheckExists {
                        dir,
                        path: d.path.clone(),
                    };
                    self.commands.push(command);
                }
                self.set_missing(dir, path, false, cause);
            }
            Ok(meta) if meta.is_dir() => {
                self.set_directory(dir, path, meta.mtime(), false, cause);
            }
            Ok(meta) if tracks_as_file(&meta) => {
                if let Some(modified) = meta.modified {
                    self.accuracy.observe(modified);
                }
                self.set_file_time(dir, path, meta.mtime(), false, false, cause);
            }
            Ok(_) => {}
        }
    }

    pub(crate) fn on_exists_checked(&mut self, dir: DirId, exists: bool) {
        let subscribed = self.dirs.get(&dir).is_some_and(|d| d.subscribed);
        if !exists && subscribed {
            self.on_directory_removed(dir, Cause::DirectoryRemoved);
        }
    }

    pub(crate) fn on_watcher_error(&mut self, dir: DirId, error: &io::Error) {
        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        if !is_transient(error) {
            warn!(path = ?d.path, error = %error, "native watcher error");
        }
        self.on_directory_removed(dir, Cause::DirectoryRemoved);
    }

    pub(crate) fn on_subscribe_failed(&mut self, dir: DirId, error: &io::Error) {
        if let Some(d) = self.dirs.get_mut(&dir) {
            // The runtime holds no subscription for this directory.
            d.subscribed = false;
        }
        self.on_watcher_error(dir, error);
    }

    pub(crate) fn on_directory_removed(&mut self, dir: DirId, cause: Cause) {
        self.release_native_watcher(dir);
        self.watch_in_parent_directory(dir);

        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        let tracked: Vec<PathBuf> = d
            .directories
            .keys()
            .chain(
                d.files
                    .iter()
                    .filter(|(_, rec)| rec.modified_time.is_some())
                    .map(|(p, _)| p),
            )
            .cloned()
            .collect();
        for path in tracked {
            self.set_missing(dir, path, false, cause);
        }
    }

    fn watch_in_parent_directory(&mut self, dir: DirId) {
        let Some(d) = self.dirs.get(&dir) else {
            return;
        };
        if d.parent_watcher.is_some() {
            return;
        }
        let Some(parent) = parent_dir(&d.path) else {
            return;
        };
        // Never watch the filesystem root itself.
        if is_root(parent) {
            return;
        }
        let parent = parent.to_path_buf();
        let path = d.path.clone();
        let options = Arc::clone(&d.options);

        debug!(path = ?path, parent = ?parent, "watching parent directory for reappearance");
        let attached = self.attach(&parent, &path, &options, Some(1), Listener::Parent { child: dir });
        if let Some(d) = self.dirs.get_mut(&dir) {
            d.parent_watcher = Some(attached.id);
        }
    }

    /// Events from the parent-directory watch of a missing directory.
    pub(crate) fn on_parent_signal(&mut self, child: DirId, kind: WatcherEventKind) {
        match kind {
            WatcherEventKind::Change { mtime, cause, .. } => {
                let Some(d) = self.dirs.get_mut(&child) else {
                    return;
                };
                let parent_handle = d.parent_watcher.take();
                if let Some(handle) = parent_handle {
                    self.release_handle(handle);
                }
                let Some(d) = self.dirs.get(&child) else {
                    return;
                };
                if d.subscribed {
                    return;
                }
                let self_path = d.path.clone();
                debug!(path = ?self_path, "directory reappeared; resubscribing");
                self.create_native_watcher(child);
                self.do_scan(child, false);
                let change = WatcherEventKind::Change {
                    path: self_path.clone(),
                    mtime,
                    cause,
                    initial: false,
                };
                self.emit_at(child, &self_path, change, |_| true);
            }
            WatcherEventKind::Remove { .. } => {
                self.on_directory_removed(child, Cause::DirectoryRemoved);
            }
            WatcherEventKind::InitialMissing { .. } => {}
        }
    }
}
