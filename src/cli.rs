// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `watchpack`.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "watchpack",
    version,
    about = "Watch files and directories and report debounced, aggregated changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a config file (TOML).
    ///
    /// Default: `watchpack.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// File to watch. Repeatable.
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Directory to watch recursively. Repeatable.
    #[arg(long = "dir", value_name = "PATH")]
    pub directories: Vec<PathBuf>,

    /// File expected to be absent at start. Repeatable.
    #[arg(long = "missing", value_name = "PATH")]
    pub missing: Vec<PathBuf>,

    /// Quiet period in ms before an aggregated batch is printed.
    #[arg(long, value_name = "MS")]
    pub aggregate_timeout: Option<u64>,

    /// Poll instead of using native notifications, optionally every MS.
    #[arg(long, value_name = "MS", num_args = 0..=1, default_missing_value = "5007")]
    pub poll: Option<u64>,

    /// Also watch the symlinks leading to each path.
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Glob of paths to ignore. Repeatable.
    #[arg(long = "ignore", value_name = "GLOB")]
    pub ignore: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WATCHPACK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the watch plan, but don't watch anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
