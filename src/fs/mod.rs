// src/fs/mod.rs

//! Filesystem metadata access.
//!
//! The engine only ever looks at metadata (kind + timestamps) and directory
//! listings. Everything goes through [`FileSystem`] so tests can swap in the
//! in-memory [`mock::MockFileSystem`].

use std::ffi::OsString;
use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::types::{Timestamp, to_timestamp};

pub mod mock;

/// What a directory entry is, as seen by `lstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// The subset of `lstat` output the watcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub kind: EntryKind,
    pub modified: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Modification time in ms, falling back to creation time, then to 1.
    pub fn mtime(&self) -> Timestamp {
        [self.modified, self.created]
            .into_iter()
            .flatten()
            .map(to_timestamp)
            .find(|t| *t != 0)
            .unwrap_or(1)
    }
}

impl From<fs::Metadata> for Metadata {
    fn from(meta: fs::Metadata) -> Self {
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Directory
        } else if ft.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Self {
            kind,
            modified: meta.modified().ok(),
            created: meta.created().ok(),
        }
    }
}

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    /// Metadata without following a final symlink.
    fn metadata(&self, path: &Path) -> io::Result<Metadata>;

    /// Names of the entries of a directory (not full paths).
    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn exists(&self, path: &Path) -> bool;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn metadata(&self, path: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(path).map(Metadata::from)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name());
        }
        Ok(names)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
