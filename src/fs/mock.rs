// src/fs/mock.rs

//! In-memory filesystem for tests.
//!
//! Paths are expected to be absolute (`/proj/a.txt`). Parent directories are
//! created implicitly, the same way `mkdir -p` would.

use super::{EntryKind, FileSystem, Metadata};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

const MAX_LINK_HOPS: usize = 40;

#[derive(Debug, Clone)]
pub enum MockEntry {
    File { modified: SystemTime },
    Dir { children: Vec<String>, modified: SystemTime },
    Symlink(PathBuf),
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    failures: HashMap<PathBuf, io::ErrorKind>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

fn at(ms: Timestamp) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such entry: {path:?}"))
}

impl MockFileSystem {
    pub fn new() -> Self {
        let mut state = MockState::default();
        // Ensure root exists
        state.entries.insert(
            PathBuf::from("/"),
            MockEntry::Dir {
                children: Vec::new(),
                modified: at(1),
            },
        );

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Create or overwrite a file with the given mtime (ms).
    pub fn add_file(&self, path: impl AsRef<Path>, mtime: Timestamp) {
        self.insert(path.as_ref(), MockEntry::File { modified: at(mtime) });
    }

    /// Same as [`add_file`](Self::add_file) with a sub-millisecond part.
    pub fn add_file_precise(&self, path: impl AsRef<Path>, modified: SystemTime) {
        self.insert(path.as_ref(), MockEntry::File { modified });
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state.lock().unwrap();
        Self::ensure_dir_entry(&mut state.entries, path);
    }

    pub fn add_symlink(&self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
        self.insert(path.as_ref(), MockEntry::Symlink(target.into()));
    }

    /// Change the mtime of an existing file.
    pub fn set_mtime(&self, path: impl AsRef<Path>, mtime: Timestamp) {
        let mut state = self.state.lock().unwrap();
        if let Some(MockEntry::File { modified }) = state.entries.get_mut(path.as_ref()) {
            *modified = at(mtime);
        }
    }

    /// Remove an entry and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut state = self.state.lock().unwrap();
        state.entries.retain(|p, _| !p.starts_with(&path));
        if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
            if let Some(MockEntry::Dir { children, .. }) = state.entries.get_mut(parent) {
                let name = name.to_string_lossy();
                children.retain(|c| c.as_str() != name);
            }
        }
    }

    /// Make every operation on `path` fail with `kind`.
    pub fn fail_with(&self, path: impl AsRef<Path>, kind: io::ErrorKind) {
        let mut state = self.state.lock().unwrap();
        state.failures.insert(path.as_ref().to_path_buf(), kind);
    }

    pub fn clear_failure(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock().unwrap();
        state.failures.remove(path.as_ref());
    }

    fn insert(&self, path: &Path, entry: MockEntry) {
        let mut state = self.state.lock().unwrap();
        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(&mut state.entries, parent);
            Self::link_child(&mut state.entries, parent, path);
        }
        state.entries.insert(path.to_path_buf(), entry);
    }

    fn ensure_dir_entry(entries: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        if entries.contains_key(path) {
            return;
        }
        entries.insert(
            path.to_path_buf(),
            MockEntry::Dir {
                children: Vec::new(),
                modified: at(1),
            },
        );
        if let Some(parent) = path.parent() {
            Self::ensure_dir_entry(entries, parent);
            Self::link_child(entries, parent, path);
        }
    }

    fn link_child(entries: &mut HashMap<PathBuf, MockEntry>, parent: &Path, path: &Path) {
        if let Some(MockEntry::Dir { children, .. }) = entries.get_mut(parent) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !children.iter().any(|c| c == name) {
                    children.push(name.to_string());
                }
            }
        }
    }

    fn check_failure(state: &MockState, path: &Path) -> io::Result<()> {
        match state.failures.get(path) {
            Some(kind) => Err(io::Error::new(*kind, format!("injected failure: {path:?}"))),
            None => Ok(()),
        }
    }

    /// Follow symlinks until a non-link entry is reached.
    fn follow(state: &MockState, path: &Path) -> io::Result<(PathBuf, MockEntry)> {
        let mut current = path.to_path_buf();
        for _ in 0..MAX_LINK_HOPS {
            match state.entries.get(&current) {
                Some(MockEntry::Symlink(target)) => {
                    current = match current.parent() {
                        Some(parent) => parent.join(target),
                        None => target.clone(),
                    };
                }
                Some(entry) => return Ok((current, entry.clone())),
                None => return Err(not_found(path)),
            }
        }
        Err(io::Error::other(format!("too many levels of symbolic links: {path:?}")))
    }
}

impl FileSystem for MockFileSystem {
    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        let state = self.state.lock().unwrap();
        Self::check_failure(&state, path)?;
        match state.entries.get(path) {
            Some(MockEntry::File { modified }) => Ok(Metadata {
                kind: EntryKind::File,
                modified: Some(*modified),
                created: None,
            }),
            Some(MockEntry::Dir { modified, .. }) => Ok(Metadata {
                kind: EntryKind::Directory,
                modified: Some(*modified),
                created: None,
            }),
            Some(MockEntry::Symlink(_)) => Ok(Metadata {
                kind: EntryKind::Symlink,
                modified: Some(at(1)),
                created: None,
            }),
            None => Err(not_found(path)),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let state = self.state.lock().unwrap();
        Self::check_failure(&state, path)?;
        match Self::follow(&state, path)? {
            (_, MockEntry::Dir { children, .. }) => {
                Ok(children.iter().map(OsString::from).collect())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("not a directory: {path:?}"),
            )),
        }
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        let state = self.state.lock().unwrap();
        Self::check_failure(&state, path)?;
        match state.entries.get(path) {
            Some(MockEntry::Symlink(target)) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a symlink: {path:?}"),
            )),
            None => Err(not_found(path)),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        Self::follow(&state, path).is_ok()
    }
}
