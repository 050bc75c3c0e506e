// src/lib.rs

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod types;
pub mod watch;

use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::{debug, info};

pub use crate::aggregate::{Aggregated, Aggregator, AggregatorEvent, AggregatorOptions, WatchSpec};
pub use crate::engine::WatcherManager;
pub use crate::errors::WatchpackError;

use crate::aggregate::plan::{TargetKind, plan};
use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_from_path};
use crate::config::model::{ConfigFile, PollSetting, RawConfigFile};
use crate::fs::{FileSystem, RealFileSystem};
use crate::watch::options::NormalizedOptions;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the aggregator and its watcher manager
/// - printing of live and aggregated events
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = resolve_config(&args)?;
    if cfg.watch.is_empty() {
        bail!("nothing to watch; pass --file, --dir, --missing or a config with a [watch] section");
    }

    let options = cfg.aggregator_options();
    let spec = cfg.watch_spec();

    if args.dry_run {
        print_dry_run(&options, &spec)?;
        return Ok(());
    }

    let aggregator = Aggregator::new(options)?;
    let mut events = aggregator.subscribe();
    aggregator.watch(spec)?;
    info!(
        watchers = aggregator.watcher_count(),
        "watching; press Ctrl-C to stop"
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Ctrl-C received; shutting down");
                break;
            }
        }
    }

    aggregator.close();
    Ok(())
}

/// Load the config (explicit path, or the default file when present) and
/// apply command-line overrides before validation.
fn resolve_config(args: &CliArgs) -> Result<ConfigFile> {
    let mut raw = match &args.config {
        Some(path) => load_from_path(path)?,
        None => {
            let path = default_config_path();
            if path.is_file() {
                debug!(path = ?path, "using default config file");
                load_from_path(&path)?
            } else {
                RawConfigFile::default()
            }
        }
    };
    apply_overrides(&mut raw, args);
    Ok(ConfigFile::try_from(raw)?)
}

fn apply_overrides(raw: &mut RawConfigFile, args: &CliArgs) {
    raw.watch.files.extend(args.files.iter().cloned());
    raw.watch.directories.extend(args.directories.iter().cloned());
    raw.watch.missing.extend(args.missing.iter().cloned());
    raw.options.ignored.extend(args.ignore.iter().cloned());

    if let Some(ms) = args.aggregate_timeout {
        raw.options.aggregate_timeout_ms = ms;
    }
    if let Some(ms) = args.poll {
        raw.options.poll = PollSetting::IntervalMs(ms);
    }
    if args.follow_symlinks {
        raw.options.follow_symlinks = true;
    }
}

fn print_event(event: &AggregatorEvent) {
    match event {
        AggregatorEvent::Change { file, mtime, cause } => match mtime {
            Some(mtime) => println!("change  {} ({cause}, mtime {mtime})", file.display()),
            None => println!("change  {} ({cause}, gone)", file.display()),
        },
        AggregatorEvent::Remove { file, cause } => {
            println!("remove  {} ({cause})", file.display());
        }
        AggregatorEvent::Aggregated(batch) => {
            println!(
                "aggregated: {} changed, {} removed",
                batch.changes.len(),
                batch.removals.len()
            );
            for path in &batch.changes {
                println!("  ~ {}", path.display());
            }
            for path in &batch.removals {
                println!("  - {}", path.display());
            }
        }
    }
}

/// Simple dry-run output: print options and the resolved watch targets.
fn print_dry_run(options: &AggregatorOptions, spec: &WatchSpec) -> Result<()> {
    let normalized = NormalizedOptions::normalize(&options.watch_options())?;
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let targets = plan(spec, &normalized, &fs)?;

    println!("watchpack dry-run");
    println!("  aggregate_timeout = {:?}", options.aggregate_timeout);
    println!("  poll = {:?}", options.poll);
    println!("  follow_symlinks = {}", options.follow_symlinks);
    println!("  ignored = {:?}", options.ignored);
    println!();

    println!("targets ({}):", targets.len());
    for ((kind, path), items) in &targets {
        let kind = match kind {
            TargetKind::File => "file",
            TargetKind::Directory => "dir ",
        };
        println!("  - {kind} {}", path.display());
        for item in items.iter().filter(|item| *item != path) {
            println!("      for: {}", item.display());
        }
    }

    debug!("dry-run complete (nothing watched)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn cli_overrides_extend_the_config() {
        let mut raw = RawConfigFile::default();
        raw.watch.files.push(PathBuf::from("/cfg/a"));
        let args = CliArgs {
            files: vec![PathBuf::from("/cli/b")],
            poll: Some(100),
            aggregate_timeout: Some(50),
            ..CliArgs::default()
        };

        apply_overrides(&mut raw, &args);
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert_eq!(cfg.watch.files, vec![PathBuf::from("/cfg/a"), PathBuf::from("/cli/b")]);
        assert_eq!(cfg.options.poll, PollSetting::IntervalMs(100));
        assert_eq!(cfg.options.aggregate_timeout_ms, 50);
    }
}
