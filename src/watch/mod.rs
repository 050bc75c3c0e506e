// src/watch/mod.rs

//! Building blocks shared by the engine and the aggregator.
//!
//! This module is responsible for:
//! - Estimating the filesystem's timestamp granularity (`accuracy`).
//! - Compiling ignore rules and normalizing watch options.
//! - Resolving symlink chains (`links`).
//! - Wrapping the `notify` backends (`native`).
//! - The per-consumer [`Watcher`] handle and its events.
//!
//! It does **not** hold any watching state; that lives in `engine`.

pub mod accuracy;
pub mod links;
pub mod native;
pub mod options;
pub mod path_utils;
pub mod patterns;
pub mod watcher;

pub use accuracy::AccuracyTracker;
pub use links::{ResolvedPath, SymlinkResolver};
pub use native::{NativeSignal, NativeWatcher, NativeWatcherFactory, NotifyFactory};
pub use options::{NormalizedOptions, WatchOptions};
pub use patterns::Ignored;
pub use watcher::{EventSink, Watcher, WatcherEvent, WatcherEventKind, WatcherId};
