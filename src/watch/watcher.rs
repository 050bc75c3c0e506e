// src/watch/watcher.rs

//! Per-consumer subscription handles.
//!
//! A [`Watcher`] is a guard: it keeps one reference on its owning directory
//! watcher alive and releases it when closed or dropped. Events for the
//! handle are delivered on the [`EventSink`] given when it was created,
//! tagged with the handle's [`WatcherId`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use tokio::sync::mpsc;

use crate::engine::DirId;
use crate::engine::manager::ManagerShared;
use crate::types::{Cause, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(pub(crate) u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watcher#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEventKind {
    /// For file handles `path` is the watched file and `mtime` its raw
    /// modification time. For directory handles `path` is the entry that
    /// changed and `mtime` its effective time, `None` once it is gone.
    Change {
        path: PathBuf,
        mtime: Option<Timestamp>,
        cause: Cause,
        initial: bool,
    },
    Remove {
        cause: Cause,
    },
    /// The path is absent and the initial scan has completed.
    InitialMissing {
        cause: Cause,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub watcher: WatcherId,
    pub kind: WatcherEventKind,
}

pub type EventSink = mpsc::UnboundedSender<WatcherEvent>;

/// Subscription into a directory watcher.
pub struct Watcher {
    id: WatcherId,
    path: PathBuf,
    directory: PathBuf,
    dir: DirId,
    manager: Weak<ManagerShared>,
    released: bool,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub(crate) fn new(
        id: WatcherId,
        path: PathBuf,
        directory: PathBuf,
        dir: DirId,
        manager: Weak<ManagerShared>,
    ) -> Self {
        Self {
            id,
            path,
            directory,
            dir,
            manager,
            released: false,
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// The watched path (a file, or the directory itself).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory whose watcher owns this handle.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub(crate) fn dir_id(&self) -> DirId {
        self.dir
    }

    /// Release the handle now. Dropping it has the same effect.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(shared) = self.manager.upgrade() {
            shared.release(self.id);
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.release();
    }
}
