// tests/manager.rs

mod common;
use crate::common::{
    FakeNative, TestResult, assert_quiet, default_options, init_tracing, mock_manager,
    next_event, settle,
};

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;

use watchpack::WatchpackError;
use watchpack::fs::mock::MockFileSystem;
use watchpack::types::{Cause, NativeEventKind};
use watchpack::watch::options::{NormalizedOptions, WatchOptions};
use watchpack::watch::watcher::WatcherEventKind;

fn project() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_dir("/proj");
    fs
}

#[tokio::test]
async fn handles_in_one_directory_share_a_watcher() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let options = default_options();
    let (tx, _rx) = mpsc::unbounded_channel();

    let a = manager.watch_file(Path::new("/proj/a"), &options, None, tx.clone())?;
    let b = manager.watch_file(Path::new("/proj/b"), &options, None, tx.clone())?;
    settle().await;

    assert_eq!(a.directory(), Path::new("/proj"));
    assert_eq!(manager.directory_watcher_count(), 1);
    assert_eq!(native.subscriptions(), vec![PathBuf::from("/proj")]);

    drop(a);
    assert!(manager.has_directory_watcher(Path::new("/proj")));
    b.close();
    assert_eq!(manager.directory_watcher_count(), 0);

    settle().await;
    assert!(native.subscriptions().is_empty());
    Ok(())
}

#[tokio::test]
async fn different_options_get_separate_watchers() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let polling =
        NormalizedOptions::normalize(&WatchOptions::default().with_poll(Duration::from_millis(100)))?;
    let (tx, _rx) = mpsc::unbounded_channel();

    let _native_handle = manager.watch_file(Path::new("/proj/a"), &default_options(), None, tx.clone())?;
    let _poll_handle = manager.watch_file(Path::new("/proj/a"), &polling, None, tx)?;
    settle().await;

    assert_eq!(manager.directory_watcher_count(), 2);
    assert_eq!(manager.watcher_count(Path::new("/proj/a")), 2);
    let backends = native.backends();
    assert!(backends.contains(&None));
    assert!(backends.contains(&Some(Duration::from_millis(100))));
    Ok(())
}

#[tokio::test]
async fn modified_file_is_reported_to_its_handle() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let watcher = manager.watch_file(Path::new("/proj/a"), &default_options(), None, tx)?;
    settle().await;

    fs.set_mtime("/proj/a", 9_000);
    native.emit("/proj/a", NativeEventKind::Change);

    let event = next_event(&mut rx).await;
    assert_eq!(event.watcher, watcher.id());
    assert_eq!(
        event.kind,
        WatcherEventKind::Change {
            path: PathBuf::from("/proj/a"),
            mtime: Some(9_000),
            cause: Cause::Change,
            initial: false,
        }
    );
    Ok(())
}

#[tokio::test]
async fn absent_file_reports_initial_missing_once_scanned() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let first = manager.watch_file(Path::new("/proj/none"), &default_options(), None, tx.clone())?;
    let event = next_event(&mut rx).await;
    assert_eq!(event.watcher, first.id());
    assert_eq!(
        event.kind,
        WatcherEventKind::InitialMissing {
            cause: Cause::MissingInInitialScan
        }
    );

    // A late subscriber learns about the absence on attach.
    let second = manager.watch_file(Path::new("/proj/other"), &default_options(), None, tx)?;
    let event = next_event(&mut rx).await;
    assert_eq!(event.watcher, second.id());
    assert_eq!(
        event.kind,
        WatcherEventKind::InitialMissing {
            cause: Cause::MissingOnAttach
        }
    );
    Ok(())
}

#[tokio::test]
async fn unchanged_file_with_start_time_in_the_past_is_reported_on_attach() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _first = manager.watch_file(Path::new("/proj/a"), &default_options(), None, tx.clone())?;
    settle().await;
    assert_quiet(&mut rx, Duration::from_millis(50)).await;

    let _second = manager.watch_file(Path::new("/proj/a"), &default_options(), Some(5_000), tx)?;
    let event = next_event(&mut rx).await;
    assert!(matches!(
        event.kind,
        WatcherEventKind::Change {
            mtime: Some(5_000),
            cause: Cause::OutdatedOnAttach,
            initial: true,
            ..
        }
    ));
    Ok(())
}

#[tokio::test]
async fn missing_directory_falls_back_to_its_parent() -> TestResult {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let watcher = manager.watch_file(Path::new("/proj/sub/a"), &default_options(), None, tx)?;
    settle().await;

    assert!(native.is_subscribed("/proj"));
    assert!(!native.is_subscribed("/proj/sub"));
    assert!(manager.has_directory_watcher(Path::new("/proj")));

    fs.add_file("/proj/sub/a", 7_000);
    native.emit("/proj/sub", NativeEventKind::Rename);

    loop {
        let event = next_event(&mut rx).await;
        assert_eq!(event.watcher, watcher.id());
        if let WatcherEventKind::Change { path, mtime, .. } = event.kind {
            assert_eq!(path, PathBuf::from("/proj/sub/a"));
            assert_eq!(mtime, Some(7_000));
            break;
        }
    }

    settle().await;
    assert!(native.is_subscribed("/proj/sub"));
    assert!(!manager.has_directory_watcher(Path::new("/proj")));
    Ok(())
}

#[tokio::test]
async fn failed_subscription_watches_the_parent_instead() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_dir("/proj/locked");
    let native = FakeNative::new();
    native.fail_subscribe("/proj/locked", io::ErrorKind::PermissionDenied);
    let manager = mock_manager(&fs, &native);
    let (tx, _rx) = mpsc::unbounded_channel();

    let _watcher =
        manager.watch_directory(Path::new("/proj/locked"), &default_options(), None, tx)?;
    settle().await;

    assert!(native.is_subscribed("/proj"));
    assert!(!native.is_subscribed("/proj/locked"));
    Ok(())
}

#[tokio::test]
async fn closed_directory_stops_delivering_events() -> TestResult {
    init_tracing();
    let fs = project();
    fs.add_file("/proj/a", 5_000);
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _watcher = manager.watch_directory(Path::new("/proj"), &default_options(), None, tx)?;
    settle().await;

    manager.close_directory(Path::new("/proj"))?;
    assert!(!manager.has_directory_watcher(Path::new("/proj")));

    fs.set_mtime("/proj/a", 9_000);
    native.emit("/proj/a", NativeEventKind::Change);
    assert_quiet(&mut rx, Duration::from_millis(150)).await;
    Ok(())
}

#[tokio::test]
async fn watch_entry_rejects_paths_outside_the_directory() {
    init_tracing();
    let fs = project();
    let native = FakeNative::new();
    let manager = mock_manager(&fs, &native);
    let (tx, _rx) = mpsc::unbounded_channel();

    let result = manager.watch_entry(
        Path::new("/proj"),
        Path::new("/elsewhere/a"),
        &default_options(),
        None,
        tx,
    );
    assert!(matches!(result, Err(WatchpackError::InvalidWatchPath { .. })));
    assert_eq!(manager.directory_watcher_count(), 0);
}
