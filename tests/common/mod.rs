#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use watchpack::watch::options::{NormalizedOptions, WatchOptions};
use watchpack::watch::watcher::WatcherEvent;
use watchpack::{AggregatorOptions, WatchSpec};

pub use watchpack_test_utils::{
    ConfigFileBuilder, FakeNative, assert_quiet, init_tracing, mock_manager, next_aggregated,
    with_timeout,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Long enough for the spawned scans of a mock filesystem to finish.
pub const SETTLE: Duration = Duration::from_millis(100);

pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}

pub fn default_options() -> std::sync::Arc<NormalizedOptions> {
    NormalizedOptions::normalize(&WatchOptions::default()).expect("default options are valid")
}

pub fn fast_aggregator(timeout_ms: u64) -> AggregatorOptions {
    AggregatorOptions::default().with_aggregate_timeout(Duration::from_millis(timeout_ms))
}

pub fn files(paths: &[&str]) -> WatchSpec {
    paths.iter().fold(WatchSpec::new(), |spec, p| spec.file(PathBuf::from(p)))
}

/// Next event for any handle, failing the test after five seconds.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<WatcherEvent>) -> WatcherEvent {
    with_timeout(rx.recv())
        .await
        .expect("watcher event channel closed")
}
