// src/watch/patterns.rs

//! Ignore rules.
//!
//! A rule is either a list of globs, a single regex, or an arbitrary
//! predicate. Paths are matched in their forward-slash form, so the same
//! patterns work on every platform:
//!
//! ```toml
//! ignored = ["**/node_modules/**", "**/.git/**"]
//! ```
//!
//! A glob ending in `/**` also ignores the directory itself, so
//! `**/node_modules/**` keeps the watcher out of `node_modules` entirely.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::errors::{Result, WatchpackError};
use crate::watch::path_utils::to_slash;

pub type IgnorePredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Ignore rule as supplied by the caller.
#[derive(Clone, Default)]
pub enum Ignored {
    #[default]
    None,
    Globs(Vec<String>),
    Regex(String),
    Predicate(IgnorePredicate),
}

impl fmt::Debug for Ignored {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ignored::None => f.write_str("None"),
            Ignored::Globs(globs) => f.debug_tuple("Globs").field(globs).finish(),
            Ignored::Regex(re) => f.debug_tuple("Regex").field(re).finish(),
            Ignored::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl Ignored {
    pub fn globs<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ignored::Globs(patterns.into_iter().map(Into::into).collect())
    }

    pub fn predicate(f: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Ignored::Predicate(Arc::new(f))
    }

    /// Stable identity of the rule, used as part of the registry key.
    ///
    /// Predicates are compared by pointer.
    pub fn fingerprint(&self) -> String {
        match self {
            Ignored::None => String::new(),
            Ignored::Globs(globs) => format!("globs:{}", globs.join("\u{0}")),
            Ignored::Regex(re) => format!("regex:{re}"),
            Ignored::Predicate(f) => format!("fn:{:p}", Arc::as_ptr(f) as *const ()),
        }
    }
}

enum Matcher {
    Nothing,
    Globs(GlobSet),
    Regex(Regex),
    Predicate(IgnorePredicate),
}

/// Compiled form of [`Ignored`].
pub struct IgnoreMatcher {
    matcher: Matcher,
}

impl fmt::Debug for IgnoreMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.matcher {
            Matcher::Nothing => "nothing",
            Matcher::Globs(_) => "globs",
            Matcher::Regex(_) => "regex",
            Matcher::Predicate(_) => "predicate",
        };
        f.debug_struct("IgnoreMatcher").field("kind", &kind).finish()
    }
}

impl IgnoreMatcher {
    pub fn nothing() -> Self {
        Self {
            matcher: Matcher::Nothing,
        }
    }

    pub fn compile(ignored: &Ignored) -> Result<Self> {
        let matcher = match ignored {
            Ignored::None => Matcher::Nothing,
            Ignored::Globs(globs) if globs.is_empty() => Matcher::Nothing,
            Ignored::Globs(globs) => Matcher::Globs(build_globset(globs)?),
            Ignored::Regex(src) => Matcher::Regex(
                Regex::new(src)
                    .map_err(|e| WatchpackError::InvalidPattern(format!("{src}: {e}")))?,
            ),
            Ignored::Predicate(f) => Matcher::Predicate(Arc::clone(f)),
        };
        Ok(Self { matcher })
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        match &self.matcher {
            Matcher::Nothing => false,
            Matcher::Globs(set) => set.is_match(to_slash(path)),
            Matcher::Regex(re) => re.is_match(&to_slash(path)),
            Matcher::Predicate(f) => f(path),
        }
    }
}

/// Build a GlobSet from string patterns, adding the bare directory for
/// every `dir/**` pattern.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let pat = pat.replace('\\', "/");
        add_glob(&mut builder, &pat)?;
        if let Some(prefix) = pat.strip_suffix("/**") {
            if !prefix.is_empty() {
                add_glob(&mut builder, prefix)?;
            }
        }
    }
    builder
        .build()
        .map_err(|e| WatchpackError::InvalidPattern(e.to_string()))
}

fn add_glob(builder: &mut GlobSetBuilder, pat: &str) -> Result<()> {
    let glob = GlobBuilder::new(pat)
        .literal_separator(true)
        .build()
        .map_err(|e| WatchpackError::InvalidPattern(format!("{pat}: {e}")))?;
    builder.add(glob);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globstar_suffix_also_ignores_directory() {
        let m = IgnoreMatcher::compile(&Ignored::globs(["**/node_modules/**"])).unwrap();
        assert!(m.is_ignored(Path::new("/proj/node_modules")));
        assert!(m.is_ignored(Path::new("/proj/node_modules/pkg/index.js")));
        assert!(!m.is_ignored(Path::new("/proj/src/index.js")));
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let m = IgnoreMatcher::compile(&Ignored::globs(["/proj/*.tmp"])).unwrap();
        assert!(m.is_ignored(Path::new("/proj/a.tmp")));
        assert!(!m.is_ignored(Path::new("/proj/sub/a.tmp")));
    }

    #[test]
    fn regex_and_predicate_rules() {
        let re = IgnoreMatcher::compile(&Ignored::Regex(r"\.swp$".into())).unwrap();
        assert!(re.is_ignored(Path::new("/proj/.a.swp")));
        assert!(!re.is_ignored(Path::new("/proj/a.rs")));

        let pred = IgnoreMatcher::compile(&Ignored::predicate(|p| p.ends_with("skip"))).unwrap();
        assert!(pred.is_ignored(Path::new("/proj/skip")));
        assert!(!pred.is_ignored(Path::new("/proj/keep")));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let err = IgnoreMatcher::compile(&Ignored::Regex("(".into())).unwrap_err();
        assert!(matches!(err, WatchpackError::InvalidPattern(_)));

        let err = IgnoreMatcher::compile(&Ignored::globs(["a[b"])).unwrap_err();
        assert!(matches!(err, WatchpackError::InvalidPattern(_)));
    }

    #[test]
    fn fingerprint_identifies_predicates_by_pointer() {
        let f = Ignored::predicate(|_| false);
        let g = Ignored::predicate(|_| false);
        assert_eq!(f.fingerprint(), f.clone().fingerprint());
        assert_ne!(f.fingerprint(), g.fingerprint());
        assert_eq!(
            Ignored::globs(["a"]).fingerprint(),
            Ignored::globs(["a"]).fingerprint()
        );
    }
}
