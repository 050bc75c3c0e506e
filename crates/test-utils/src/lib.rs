pub mod builders;
pub mod fake_native;

use std::sync::Once;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt};
use watchpack::{Aggregated, AggregatorEvent};

pub use builders::{ConfigFileBuilder, mock_manager};
pub use fake_native::FakeNative;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=watchpack=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Receive events until the next aggregated batch.
///
/// Returns the live events seen before it and the batch itself.
pub async fn next_aggregated(
    rx: &mut mpsc::UnboundedReceiver<AggregatorEvent>,
) -> (Vec<AggregatorEvent>, Aggregated) {
    with_timeout(async {
        let mut live = Vec::new();
        loop {
            match rx.recv().await.expect("aggregator event channel closed") {
                AggregatorEvent::Aggregated(batch) => return (live, batch),
                other => live.push(other),
            }
        }
    })
    .await
}

/// Assert that nothing arrives on `rx` within `wait`.
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>, wait: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(wait, rx.recv()).await {
        panic!("expected no event, got {event:?}");
    }
}
