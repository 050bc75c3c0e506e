// src/types.rs

//! Small value types shared by the engine and the aggregator.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Convert a `SystemTime` into a millisecond timestamp.
///
/// Times before the epoch clamp to 0.
pub fn to_timestamp(time: SystemTime) -> Timestamp {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Source of "now" for the watcher engine.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        to_timestamp(SystemTime::now())
    }
}

/// Clock that only moves when told to. Used by tests of the pure core.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Timestamp) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Snapshot entry reported by `time_info_entries()`.
///
/// Files carry `timestamp = Some(mtime)`. Directories aggregate their subtree
/// and carry no timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub safe_time: Timestamp,
    pub timestamp: Option<Timestamp>,
}

impl TimeInfo {
    pub fn file(safe_time: Timestamp, mtime: Timestamp) -> Self {
        Self {
            safe_time,
            timestamp: Some(mtime),
        }
    }

    pub fn directory(safe_time: Timestamp) -> Self {
        Self {
            safe_time,
            timestamp: None,
        }
    }
}

/// Path -> time info. `None` marks a watched path without a recorded time.
pub type TimeInfoEntries = BTreeMap<PathBuf, Option<TimeInfo>>;

fn detail(entry: &Option<TimeInfo>) -> u8 {
    match entry {
        None => 0,
        Some(TimeInfo { timestamp: None, .. }) => 1,
        Some(TimeInfo {
            timestamp: Some(_), ..
        }) => 2,
    }
}

/// Merge `from` into `into`.
///
/// An existing entry is only replaced by a more detailed one, or by an equally
/// detailed one with a newer `safe_time`.
pub fn merge_time_info(into: &mut TimeInfoEntries, from: TimeInfoEntries) {
    for (path, entry) in from {
        match into.get(&path) {
            None => {
                into.insert(path, entry);
            }
            Some(existing) => {
                let replace = match detail(&entry).cmp(&detail(existing)) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => match (existing, &entry) {
                        (Some(old), Some(new)) => new.safe_time > old.safe_time,
                        _ => false,
                    },
                };
                if replace {
                    into.insert(path, entry);
                }
            }
        }
    }
}

/// Kind of a raw notification from the native watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeEventKind {
    /// Content or metadata changed.
    Change,
    /// Entry appeared, disappeared or was renamed.
    Rename,
}

/// Why a change / removal was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    Change,
    Rename,
    ScanFile,
    ScanDirectory,
    ScanMissing,
    MissingInInitialScan,
    ParentMissing,
    DirectoryRemoved,
    OutdatedOnAttach,
    MissingOnAttach,
}

impl From<NativeEventKind> for Cause {
    fn from(kind: NativeEventKind) -> Self {
        match kind {
            NativeEventKind::Change => Cause::Change,
            NativeEventKind::Rename => Cause::Rename,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cause::Change => "change",
            Cause::Rename => "rename",
            Cause::ScanFile => "scan (file)",
            Cause::ScanDirectory => "scan (dir)",
            Cause::ScanMissing => "scan (missing)",
            Cause::MissingInInitialScan => "scan (missing in initial scan)",
            Cause::ParentMissing => "scan (parent directory missing in initial scan)",
            Cause::DirectoryRemoved => "directory-removed",
            Cause::OutdatedOnAttach => "watch (outdated on attach)",
            Cause::MissingOnAttach => "watch (missing on attach)",
        };
        f.write_str(s)
    }
}
