// src/config/validate.rs

use crate::config::model::{ConfigFile, PollSetting, RawConfigFile};
use crate::errors::{Result, WatchpackError};
use crate::watch::patterns::IgnoreMatcher;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WatchpackError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.options, raw.watch))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_options(cfg)?;
    validate_ignore_rules(cfg)?;
    validate_watch_paths(cfg)?;
    Ok(())
}

fn validate_options(cfg: &RawConfigFile) -> Result<()> {
    if cfg.options.aggregate_timeout_ms == 0 {
        return Err(WatchpackError::ConfigError(
            "[options].aggregate_timeout_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.options.poll == PollSetting::IntervalMs(0) {
        return Err(WatchpackError::ConfigError(
            "[options].poll interval must be >= 1 ms (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_ignore_rules(cfg: &RawConfigFile) -> Result<()> {
    if cfg.options.ignored_regex.is_some() && !cfg.options.ignored.is_empty() {
        return Err(WatchpackError::ConfigError(
            "[options] may set either `ignored` or `ignored_regex`, not both".to_string(),
        ));
    }
    IgnoreMatcher::compile(&cfg.options.ignored_rule())?;
    Ok(())
}

fn validate_watch_paths(cfg: &RawConfigFile) -> Result<()> {
    let sections = [
        ("files", &cfg.watch.files),
        ("directories", &cfg.watch.directories),
        ("missing", &cfg.watch.missing),
    ];
    for (name, paths) in sections {
        if paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(WatchpackError::ConfigError(format!(
                "[watch].{name} contains an empty path"
            )));
        }
    }
    Ok(())
}
