// src/watch/options.rs

//! Watch options and their normalized form.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;
use crate::watch::patterns::{IgnoreMatcher, Ignored};

/// Interval used when polling is requested without an explicit interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5007);

/// Options that influence how a directory is watched.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// `Some(interval)` polls instead of using native notifications.
    pub poll: Option<Duration>,
    /// Expand watched paths through symlinks (handled by the aggregator).
    pub follow_symlinks: bool,
    pub ignored: Ignored,
}

impl WatchOptions {
    pub fn with_poll(mut self, interval: Duration) -> Self {
        self.poll = Some(interval);
        self
    }

    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    pub fn with_ignored(mut self, ignored: Ignored) -> Self {
        self.ignored = ignored;
        self
    }
}

/// Identity of a set of options inside the watcher registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionsKey {
    poll_ms: Option<u128>,
    follow_symlinks: bool,
    ignored: String,
}

/// Options with the ignore rule compiled once.
#[derive(Debug)]
pub struct NormalizedOptions {
    pub poll: Option<Duration>,
    pub follow_symlinks: bool,
    pub ignore: IgnoreMatcher,
    key: OptionsKey,
}

impl NormalizedOptions {
    pub fn normalize(options: &WatchOptions) -> Result<Arc<Self>> {
        let ignore = IgnoreMatcher::compile(&options.ignored)?;
        let key = OptionsKey {
            poll_ms: options.poll.map(|d| d.as_millis()),
            follow_symlinks: options.follow_symlinks,
            ignored: options.ignored.fingerprint(),
        };
        Ok(Arc::new(Self {
            poll: options.poll,
            follow_symlinks: options.follow_symlinks,
            ignore,
            key,
        }))
    }

    pub fn key(&self) -> &OptionsKey {
        &self.key
    }
}
