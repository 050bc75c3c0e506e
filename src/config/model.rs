// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::{AggregatorOptions, WatchSpec};
use crate::watch::options::DEFAULT_POLL_INTERVAL;
use crate::watch::patterns::Ignored;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [options]
/// aggregate_timeout_ms = 200
/// poll = false
/// follow_symlinks = false
/// ignored = ["**/node_modules/**", "**/.git/**"]
///
/// [watch]
/// files = ["/abs/path/file"]
/// directories = ["/abs/path/dir"]
/// missing = []
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub options: OptionsSection,

    #[serde(default)]
    pub watch: WatchSection,
}

/// `[options]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionsSection {
    /// Quiet period before an aggregated batch is reported.
    #[serde(default = "default_aggregate_timeout_ms")]
    pub aggregate_timeout_ms: u64,

    /// `true` polls at the default interval, a number polls at that many ms.
    #[serde(default)]
    pub poll: PollSetting,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Glob patterns. Mutually exclusive with `ignored_regex`.
    #[serde(default)]
    pub ignored: Vec<String>,

    #[serde(default)]
    pub ignored_regex: Option<String>,
}

fn default_aggregate_timeout_ms() -> u64 {
    200
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            aggregate_timeout_ms: default_aggregate_timeout_ms(),
            poll: PollSetting::default(),
            follow_symlinks: false,
            ignored: Vec::new(),
            ignored_regex: None,
        }
    }
}

impl OptionsSection {
    pub fn ignored_rule(&self) -> Ignored {
        match &self.ignored_regex {
            Some(re) => Ignored::Regex(re.clone()),
            None if self.ignored.is_empty() => Ignored::None,
            None => Ignored::Globs(self.ignored.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PollSetting {
    Enabled(bool),
    IntervalMs(u64),
}

impl Default for PollSetting {
    fn default() -> Self {
        PollSetting::Enabled(false)
    }
}

impl PollSetting {
    pub fn interval(self) -> Option<Duration> {
        match self {
            PollSetting::Enabled(false) => None,
            PollSetting::Enabled(true) => Some(DEFAULT_POLL_INTERVAL),
            PollSetting::IntervalMs(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// `[watch]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WatchSection {
    #[serde(default)]
    pub files: Vec<PathBuf>,

    #[serde(default)]
    pub directories: Vec<PathBuf>,

    /// Files expected to be absent at start.
    #[serde(default)]
    pub missing: Vec<PathBuf>,
}

impl WatchSection {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty() && self.missing.is_empty()
    }
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub options: OptionsSection,
    pub watch: WatchSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(options: OptionsSection, watch: WatchSection) -> Self {
        Self { options, watch }
    }

    /// Aggregator options, with `WATCHPACK_POLLING` from the environment
    /// taken into account.
    pub fn aggregator_options(&self) -> AggregatorOptions {
        let env_polling = std::env::var("WATCHPACK_POLLING").ok();
        let env_interval = std::env::var("WATCHPACK_POLLING_INTERVAL_MS").ok();
        self.aggregator_options_with_env(env_polling.as_deref(), env_interval.as_deref())
    }

    pub(crate) fn aggregator_options_with_env(
        &self,
        env_polling: Option<&str>,
        env_interval: Option<&str>,
    ) -> AggregatorOptions {
        let forced = env_polling.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let poll = if forced {
            let interval = env_interval
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            Some(interval)
        } else {
            self.options.poll.interval()
        };

        AggregatorOptions {
            aggregate_timeout: Duration::from_millis(self.options.aggregate_timeout_ms),
            poll,
            follow_symlinks: self.options.follow_symlinks,
            ignored: self.options.ignored_rule(),
        }
    }

    pub fn watch_spec(&self) -> WatchSpec {
        WatchSpec {
            files: self.watch.files.clone(),
            directories: self.watch.directories.clone(),
            missing: self.watch.missing.clone(),
            start_time: None,
        }
    }
}
