// src/watch/native.rs

//! Native change notifications.
//!
//! The engine subscribes to one directory at a time (non-recursive) and only
//! cares that *something* happened to a name. Notifications are best-effort:
//! they may be coalesced, duplicated or reordered, so every one of them is
//! followed by a fresh stat before state changes.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify::event::{EventKind, ModifyKind};
use notify::{Config, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::types::NativeEventKind;

/// What a native backend reports.
#[derive(Debug)]
pub enum NativeSignal {
    Event {
        kind: NativeEventKind,
        paths: Vec<PathBuf>,
    },
    /// Events were lost; every subscribed directory should be rescanned.
    Rescan,
    Error {
        paths: Vec<PathBuf>,
        error: io::Error,
    },
}

pub type NativeSender = mpsc::UnboundedSender<NativeSignal>;

/// A live native backend, able to watch many directories.
pub trait NativeWatcher: Send {
    fn subscribe(&mut self, dir: &Path) -> io::Result<()>;
    fn unsubscribe(&mut self, dir: &Path);
}

/// Creates backends. One backend exists per poll setting.
pub trait NativeWatcherFactory: Send + Sync + Debug {
    fn create(&self, poll: Option<Duration>, tx: NativeSender) -> Result<Box<dyn NativeWatcher>>;
}

/// Factory backed by the `notify` crate.
#[derive(Debug, Clone, Default)]
pub struct NotifyFactory;

struct NotifyBackend<W: Watcher + Send> {
    inner: W,
}

impl<W: Watcher + Send> NativeWatcher for NotifyBackend<W> {
    fn subscribe(&mut self, dir: &Path) -> io::Result<()> {
        self.inner
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(into_io_error)
    }

    fn unsubscribe(&mut self, dir: &Path) {
        // Unwatching a directory that already vanished fails; nothing to undo.
        let _ = self.inner.unwatch(dir);
    }
}

impl NativeWatcherFactory for NotifyFactory {
    fn create(&self, poll: Option<Duration>, tx: NativeSender) -> Result<Box<dyn NativeWatcher>> {
        // Closure called synchronously by notify whenever an event arrives.
        let handler = move |res: notify::Result<Event>| {
            if let Some(signal) = to_signal(res) {
                // The receiver is gone once the runtime stopped.
                let _ = tx.send(signal);
            }
        };

        match poll {
            Some(interval) => {
                let config = Config::default().with_poll_interval(interval);
                let inner = PollWatcher::new(handler, config)?;
                Ok(Box::new(NotifyBackend { inner }))
            }
            None => {
                let inner = RecommendedWatcher::new(handler, Config::default())?;
                Ok(Box::new(NotifyBackend { inner }))
            }
        }
    }
}

/// Map a raw notify result to what the engine needs to know.
pub(crate) fn to_signal(res: notify::Result<Event>) -> Option<NativeSignal> {
    match res {
        Ok(event) => {
            if event.need_rescan() {
                return Some(NativeSignal::Rescan);
            }
            let kind = match event.kind {
                EventKind::Access(_) => return None,
                EventKind::Create(_) | EventKind::Remove(_) => NativeEventKind::Rename,
                EventKind::Modify(ModifyKind::Name(_)) => NativeEventKind::Rename,
                EventKind::Modify(_) | EventKind::Any | EventKind::Other => NativeEventKind::Change,
            };
            Some(NativeSignal::Event {
                kind,
                paths: event.paths,
            })
        }
        Err(err) => {
            let paths = err.paths.clone();
            Some(NativeSignal::Error {
                paths,
                error: into_io_error(err),
            })
        }
    }
}

fn into_io_error(err: notify::Error) -> io::Error {
    match err.kind {
        notify::ErrorKind::Io(io) => io,
        notify::ErrorKind::PathNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "path not found")
        }
        notify::ErrorKind::WatchNotFound => {
            io::Error::new(io::ErrorKind::NotFound, "watch not found")
        }
        other => io::Error::other(format!("{other:?}")),
    }
}
