// tests/aggregator_mock.rs

mod common;
use crate::common::{
    FakeNative, TestResult, assert_quiet, fast_aggregator, files, init_tracing, mock_manager,
    next_aggregated, settle,
};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use watchpack::fs::mock::MockFileSystem;
use watchpack::types::{Cause, NativeEventKind};
use watchpack::watch::Ignored;
use watchpack::{Aggregated, Aggregator, AggregatorEvent, WatchSpec};

fn project() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_dir("/proj");
    fs
}

fn set(paths: &[&str]) -> BTreeSet<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}

#[tokio::test]
async fn created_file_is_reported_live_and_aggregated() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(WatchSpec::new().file("/proj/a").missing("/proj/a"))?;
    settle().await;

    fs.add_file("/proj/a", 5_000);
    native.emit("/proj/a", NativeEventKind::Rename);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert_eq!(
        live,
        vec![AggregatorEvent::Change {
            file: PathBuf::from("/proj/a"),
            mtime: Some(5_000),
            cause: Cause::Rename,
        }]
    );
    assert_eq!(batch.changes, set(&["/proj/a"]));
    assert!(batch.removals.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_file_then_created_ends_up_as_a_change() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(300))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(files(&["/proj/a"]))?;
    settle().await;

    fs.add_file("/proj/a", 5_000);
    native.emit("/proj/a", NativeEventKind::Rename);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert!(matches!(live.first(), Some(AggregatorEvent::Remove { .. })));
    assert!(matches!(live.last(), Some(AggregatorEvent::Change { .. })));
    assert_eq!(
        batch,
        Aggregated {
            changes: set(&["/proj/a"]),
            removals: BTreeSet::new(),
        }
    );
    Ok(())
}

#[tokio::test]
async fn removed_file_is_aggregated_as_removal() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(files(&["/proj/a"]))?;
    settle().await;
    assert!(matches!(aggregator.times().get(Path::new("/proj/a")), Some(Some(_))));

    fs.remove("/proj/a");
    native.emit("/proj/a", NativeEventKind::Rename);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert_eq!(
        live,
        vec![AggregatorEvent::Remove {
            file: PathBuf::from("/proj/a"),
            cause: Cause::Rename,
        }]
    );
    assert!(batch.changes.is_empty());
    assert_eq!(batch.removals, set(&["/proj/a"]));
    assert_eq!(aggregator.times().get(Path::new("/proj/a")), Some(&None));
    Ok(())
}

#[tokio::test]
async fn directory_item_reports_the_changed_entry_live() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_dir("/proj/d");
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(WatchSpec::new().directory("/proj/d"))?;
    settle().await;

    fs.add_file("/proj/d/x", 5_000);
    native.emit("/proj/d/x", NativeEventKind::Rename);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert!(matches!(
        live.as_slice(),
        [AggregatorEvent::Change { file, .. }] if file == Path::new("/proj/d/x")
    ));
    assert_eq!(batch.changes, set(&["/proj/d"]));
    Ok(())
}

#[tokio::test]
async fn burst_of_changes_is_delivered_as_one_batch() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(200))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(
        WatchSpec::new()
            .file("/proj/a")
            .file("/proj/b")
            .missing("/proj/a")
            .missing("/proj/b"),
    )?;
    settle().await;

    fs.add_file("/proj/a", 5_000);
    native.emit("/proj/a", NativeEventKind::Rename);
    tokio::time::sleep(Duration::from_millis(50)).await;
    fs.add_file("/proj/b", 6_000);
    native.emit("/proj/b", NativeEventKind::Rename);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert_eq!(live.len(), 2);
    assert_eq!(batch.changes, set(&["/proj/a", "/proj/b"]));
    assert_quiet(&mut rx, Duration::from_millis(300)).await;
    Ok(())
}

#[tokio::test]
async fn paused_aggregator_keeps_changes_for_get_aggregated() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(WatchSpec::new().file("/proj/a").missing("/proj/a"))?;
    settle().await;
    aggregator.pause();
    assert!(aggregator.is_paused());

    fs.add_file("/proj/a", 5_000);
    native.emit("/proj/a", NativeEventKind::Rename);
    assert_quiet(&mut rx, Duration::from_millis(200)).await;

    let batch = aggregator.get_aggregated();
    assert_eq!(batch.changes, set(&["/proj/a"]));
    assert!(aggregator.get_aggregated().is_empty());
    Ok(())
}

#[tokio::test]
async fn rewatch_keeps_shared_paths_and_releases_dropped_ones() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    fs.add_file("/proj/b", 5_000);
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(files(&["/proj/a", "/proj/b"]))?;
    settle().await;
    let manager = aggregator.manager();
    assert_eq!(manager.watcher_count(Path::new("/proj/a")), 1);

    aggregator.watch(WatchSpec::new().file("/proj/b").file("/proj/c").missing("/proj/c"))?;
    assert_eq!(aggregator.watcher_count(), 2);
    assert_eq!(manager.watcher_count(Path::new("/proj/a")), 0);
    assert_eq!(manager.watcher_count(Path::new("/proj/b")), 1);
    assert_quiet(&mut rx, Duration::from_millis(200)).await;

    // Events for a dropped path no longer reach the aggregator.
    fs.set_mtime("/proj/a", 9_000);
    native.emit("/proj/a", NativeEventKind::Change);
    assert_quiet(&mut rx, Duration::from_millis(200)).await;

    aggregator.close();
    assert_eq!(manager.directory_watcher_count(), 0);
    settle().await;
    assert!(native.subscriptions().is_empty());
    Ok(())
}

#[tokio::test]
async fn start_time_selects_initially_reported_files() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/old", 5_000);
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(files(&["/proj/old"]).start_time(6_001))?;
    settle().await;
    assert_quiet(&mut rx, Duration::from_millis(150)).await;

    aggregator.close();
    aggregator.watch(files(&["/proj/old"]).start_time(6_000))?;
    let (live, batch) = next_aggregated(&mut rx).await;
    assert!(matches!(
        live.as_slice(),
        [AggregatorEvent::Change { mtime: Some(5_000), .. }]
    ));
    assert_eq!(batch.changes, set(&["/proj/old"]));
    Ok(())
}

#[tokio::test]
async fn native_rescan_picks_up_unreported_files() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), fast_aggregator(50))?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(WatchSpec::new().file("/proj/a").missing("/proj/a"))?;
    settle().await;

    fs.add_file("/proj/a", 5_000);
    native.rescan();

    let (_, batch) = next_aggregated(&mut rx).await;
    assert_eq!(batch.changes, set(&["/proj/a"]));
    Ok(())
}

#[tokio::test]
async fn followed_symlink_reports_the_linked_item() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/c", 1_000);
    fs.add_symlink("/proj/b", "/proj/c");
    fs.add_symlink("/proj/a", "/proj/b");
    let native = FakeNative::new();
    let options = fast_aggregator(50).with_follow_symlinks(true);
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), options)?;
    let mut rx = aggregator.subscribe();

    aggregator.watch(files(&["/proj/a"]))?;
    settle().await;

    fs.set_mtime("/proj/c", 9_000);
    native.emit("/proj/c", NativeEventKind::Change);

    let (live, batch) = next_aggregated(&mut rx).await;
    assert_eq!(
        live,
        vec![AggregatorEvent::Change {
            file: PathBuf::from("/proj/a"),
            mtime: Some(9_000),
            cause: Cause::Change,
        }]
    );
    assert_eq!(batch.changes, set(&["/proj/a"]));
    Ok(())
}

#[tokio::test]
async fn ignored_paths_are_not_watched() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let options = fast_aggregator(50).with_ignored(Ignored::globs(["**/*.tmp"]));
    let aggregator = Aggregator::with_manager(mock_manager(&fs, &native), options)?;

    aggregator.watch(files(&["/proj/a", "/proj/b.tmp"]))?;
    assert_eq!(aggregator.watcher_count(), 1);
    assert_eq!(aggregator.manager().watcher_count(Path::new("/proj/b.tmp")), 0);
    Ok(())
}
