// src/watch/path_utils.rs

//! Utility functions for path handling in the watcher.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Map key for a watched path that ignores case.
///
/// Native watchers on case-insensitive filesystems may report a name in a
/// different case than the one a consumer asked for. Lookups go through the
/// folded form; the original path is kept for reporting.
#[derive(Debug, Clone)]
pub struct PathKey {
    folded: String,
    original: PathBuf,
}

impl PathKey {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let original = path.into();
        let folded = original.to_string_lossy().to_lowercase();
        Self { folded, original }
    }

    pub fn original(&self) -> &Path {
        &self.original
    }

    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for PathKey {}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl Borrow<str> for PathKey {
    fn borrow(&self) -> &str {
        &self.folded
    }
}

/// Folded lookup form of `path`, usable against a `HashMap<PathKey, _>`.
pub fn fold(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// Parent directory of `path`, or `None` for a root or a bare name.
pub fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// True when `path` has no parent (`/`, `C:\`).
pub fn is_root(path: &Path) -> bool {
    parent_dir(path).is_none()
}

/// Path rendered with forward slashes, for glob / regex matching.
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn path_key_ignores_case() {
        let mut map = HashMap::new();
        map.insert(PathKey::new("/Proj/File.TXT"), 1);

        assert_eq!(map.get(fold(Path::new("/proj/file.txt")).as_str()), Some(&1));
        let key = map.keys().next().unwrap();
        assert_eq!(key.original(), Path::new("/Proj/File.TXT"));
    }

    #[test]
    fn parent_of_root_is_none() {
        assert_eq!(parent_dir(Path::new("/a")), Some(Path::new("/")));
        assert!(is_root(Path::new("/")));
        assert_eq!(parent_dir(Path::new("a")), None);
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(to_slash(Path::new("a/b")), "a/b");
    }
}
