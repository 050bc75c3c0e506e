#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use watchpack::config::{ConfigFile, PollSetting, RawConfigFile};
use watchpack::engine::WatcherManager;
use watchpack::fs::mock::MockFileSystem;
use watchpack::types::Clock;

use crate::fake_native::FakeNative;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.watch.files.push(path.into());
        self
    }

    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.watch.directories.push(path.into());
        self
    }

    pub fn missing(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.watch.missing.push(path.into());
        self
    }

    pub fn ignore(mut self, glob: &str) -> Self {
        self.config.options.ignored.push(glob.to_string());
        self
    }

    pub fn aggregate_timeout_ms(mut self, ms: u64) -> Self {
        self.config.options.aggregate_timeout_ms = ms;
        self
    }

    pub fn poll(mut self, poll: PollSetting) -> Self {
        self.config.options.poll = poll;
        self
    }

    pub fn follow_symlinks(mut self) -> Self {
        self.config.options.follow_symlinks = true;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Manager over an in-memory filesystem and a hand-driven native backend.
///
/// Must be called from within a Tokio runtime.
pub fn mock_manager(fs: &MockFileSystem, native: &FakeNative) -> WatcherManager {
    WatcherManager::builder()
        .file_system(Arc::new(fs.clone()))
        .native_factory(Arc::new(native.clone()))
        .build()
}

/// Same as [`mock_manager`] with a controlled clock.
pub fn mock_manager_with_clock(
    fs: &MockFileSystem,
    native: &FakeNative,
    clock: Arc<dyn Clock>,
) -> WatcherManager {
    WatcherManager::builder()
        .file_system(Arc::new(fs.clone()))
        .native_factory(Arc::new(native.clone()))
        .clock(clock)
        .build()
}
