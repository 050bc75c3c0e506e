// src/engine/mod.rs

//! Directory watching engine.
//!
//! This module ties together:
//! - the per-directory watching state machine (`directory`)
//! - the reference-counted registry of directory watchers (`core`)
//! - the async shell that performs stats, scans and native subscriptions
//!   (`runtime`)
//! - the public handle used to create watchers (`manager`)
//!
//! The pure core consumes [`Input`]s and produces [`Command`]s. It never
//! touches the filesystem itself, so it is unit tested without Tokio,
//! channels or a real disk.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::fs::Metadata;
use crate::types::{Cause, NativeEventKind};

/// Stable identifier of a directory watcher inside the core.
///
/// Ids are never reused, so results arriving for a closed watcher find
/// nothing and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(pub(crate) u64);

/// One stat result of a directory scan.
#[derive(Debug)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub result: io::Result<Metadata>,
}

/// Events flowing into the core from the IO shell.
#[derive(Debug)]
pub enum Input {
    /// A native notification for `path`.
    Native { path: PathBuf, kind: NativeEventKind },
    /// Native events were lost.
    Rescan,
    /// Asynchronous error reported by a native backend.
    NativeError { path: PathBuf, error: io::Error },
    /// Subscribing `dir` to native notifications failed.
    SubscribeFailed { dir: DirId, error: io::Error },
    StatDone {
        dir: DirId,
        path: PathBuf,
        cause: Cause,
        result: io::Result<Metadata>,
    },
    ScanDone {
        dir: DirId,
        initial: bool,
        result: io::Result<Vec<ScanEntry>>,
    },
    ExistsChecked { dir: DirId, exists: bool },
}

/// Work the IO shell should perform on behalf of the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe {
        dir: DirId,
        path: PathBuf,
        poll: Option<Duration>,
    },
    Unsubscribe {
        path: PathBuf,
        poll: Option<Duration>,
    },
    Stat {
        dir: DirId,
        path: PathBuf,
        cause: Cause,
    },
    Scan {
        dir: DirId,
        path: PathBuf,
        initial: bool,
    },
    CheckExists { dir: DirId, path: PathBuf },
}

pub mod core;
pub mod directory;
pub mod manager;
pub mod runtime;

pub use self::core::WatchCore;
pub use manager::{ManagerBuilder, WatcherManager};
pub use runtime::Runtime;
