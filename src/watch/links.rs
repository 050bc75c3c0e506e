// src/watch/links.rs

//! Symlink-aware target resolution.
//!
//! To notice every change reachable through a symlinked path the aggregator
//! has to watch the real target *and* every link on the way to it, because
//! re-pointing a link changes what the path means without touching the
//! target.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::fs::FileSystem;
use crate::watch::path_utils::{normalize_lexically, parent_dir};

/// Symlink hops allowed before a chain is treated as a loop. Plain path
/// segments do not count.
const MAX_LINK_DEPTH: usize = 40;

/// Outcome of [`SymlinkResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Where the path really lives once every link is followed.
    pub target: PathBuf,
    /// Symlinks traversed to get there, outermost parent links first.
    pub links: Vec<PathBuf>,
}

impl ResolvedPath {
    fn plain(path: PathBuf) -> Self {
        Self {
            target: path,
            links: Vec::new(),
        }
    }

    /// Target followed by every link.
    pub fn all_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.target.as_path()).chain(self.links.iter().map(PathBuf::as_path))
    }
}

/// Resolves paths one segment at a time, caching every prefix.
#[derive(Debug)]
pub struct SymlinkResolver {
    fs: Arc<dyn FileSystem>,
    cache: HashMap<PathBuf, ResolvedPath>,
}

fn is_expected(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

impl SymlinkResolver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            cache: HashMap::new(),
        }
    }

    /// Resolve `path`. Missing segments end resolution instead of failing.
    pub fn resolve(&mut self, path: &Path) -> io::Result<ResolvedPath> {
        let path = normalize_lexically(path);
        self.resolve_at(&path, 0)
    }

    fn resolve_at(&mut self, file: &Path, depth: usize) -> io::Result<ResolvedPath> {
        if let Some(hit) = self.cache.get(file) {
            return Ok(hit.clone());
        }
        if depth > MAX_LINK_DEPTH {
            return Err(io::Error::other(format!(
                "too many levels of symbolic links resolving {file:?}"
            )));
        }

        let Some(parent) = parent_dir(file) else {
            let result = ResolvedPath::plain(file.to_path_buf());
            self.cache.insert(file.to_path_buf(), result.clone());
            return Ok(result);
        };

        let parent_resolved = self.resolve_at(parent, depth)?;
        let real_file = match (parent_resolved.target != parent, file.file_name()) {
            (true, Some(name)) => parent_resolved.target.join(name),
            _ => file.to_path_buf(),
        };

        let result = match self.fs.read_link(&real_file) {
            Ok(content) => {
                let link_target = normalize_lexically(&parent_resolved.target.join(content));
                let link_resolved = self.resolve_at(&link_target, depth + 1)?;
                merge_chain(parent_resolved, link_resolved, real_file)
            }
            Err(err) if is_expected(&err) => ResolvedPath {
                target: real_file,
                links: parent_resolved.links,
            },
            Err(err) => return Err(err),
        };

        self.cache.insert(file.to_path_buf(), result.clone());
        Ok(result)
    }
}

/// Combine the resolution of a link's parent and of the link's target.
fn merge_chain(parent: ResolvedPath, link: ResolvedPath, real_file: PathBuf) -> ResolvedPath {
    let mut links = Vec::with_capacity(parent.links.len() + link.links.len() + 1);
    match (parent.links.is_empty(), link.links.is_empty()) {
        (false, false) => {
            links.extend(link.links);
            for extra in std::iter::once(real_file).chain(parent.links) {
                if !links.contains(&extra) && extra != link.target {
                    links.push(extra);
                }
            }
        }
        (false, true) => {
            links.extend(parent.links);
            links.push(real_file);
        }
        (true, false) => {
            links.extend(link.links);
            links.push(real_file);
        }
        (true, true) => links.push(real_file),
    }
    ResolvedPath {
        target: link.target,
        links,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn resolver(fs: &MockFileSystem) -> SymlinkResolver {
        SymlinkResolver::new(Arc::new(fs.clone()))
    }

    #[test]
    fn plain_path_resolves_to_itself() {
        let fs = MockFileSystem::new();
        fs.add_file("/proj/a.txt", 1000);

        let resolved = resolver(&fs).resolve(Path::new("/proj/a.txt")).unwrap();
        assert_eq!(resolved, ResolvedPath::plain(PathBuf::from("/proj/a.txt")));
    }

    #[test]
    fn follows_a_chain_of_links() {
        let fs = MockFileSystem::new();
        fs.add_file("/proj/c", 1000);
        fs.add_symlink("/proj/b", "c");
        fs.add_symlink("/proj/a", "/proj/b");

        let resolved = resolver(&fs).resolve(Path::new("/proj/a")).unwrap();
        assert_eq!(resolved.target, PathBuf::from("/proj/c"));
        assert_eq!(
            resolved.links,
            vec![PathBuf::from("/proj/b"), PathBuf::from("/proj/a")]
        );
    }

    #[test]
    fn resolves_through_linked_parent_directory() {
        let fs = MockFileSystem::new();
        fs.add_file("/real/dir/file.txt", 1000);
        fs.add_symlink("/proj/link", "/real/dir");

        let resolved = resolver(&fs).resolve(Path::new("/proj/link/file.txt")).unwrap();
        assert_eq!(resolved.target, PathBuf::from("/real/dir/file.txt"));
        assert_eq!(resolved.links, vec![PathBuf::from("/proj/link")]);
    }

    #[test]
    fn missing_target_returns_chain_so_far() {
        let fs = MockFileSystem::new();
        fs.add_symlink("/proj/a", "/proj/not-yet");

        let resolved = resolver(&fs).resolve(Path::new("/proj/a")).unwrap();
        assert_eq!(resolved.target, PathBuf::from("/proj/not-yet"));
        assert_eq!(resolved.links, vec![PathBuf::from("/proj/a")]);
    }

    #[test]
    fn deep_plain_path_is_not_a_loop() {
        let fs = MockFileSystem::new();
        let deep: PathBuf = std::iter::once("/".to_string())
            .chain((0..60).map(|i| format!("d{i}")))
            .collect();
        fs.add_file(deep.join("leaf.txt"), 1000);

        let resolved = resolver(&fs).resolve(&deep.join("leaf.txt")).unwrap();
        assert_eq!(resolved.target, deep.join("leaf.txt"));
        assert!(resolved.links.is_empty());
    }

    #[test]
    fn deep_path_behind_a_link_resolves() {
        let fs = MockFileSystem::new();
        let deep: PathBuf = std::iter::once("/real".to_string())
            .chain((0..50).map(|i| format!("n{i}")))
            .collect();
        fs.add_file(deep.join("leaf.txt"), 1000);
        fs.add_symlink("/proj/link", deep.clone());

        let resolved = resolver(&fs).resolve(Path::new("/proj/link/leaf.txt")).unwrap();
        assert_eq!(resolved.target, deep.join("leaf.txt"));
        assert_eq!(resolved.links, vec![PathBuf::from("/proj/link")]);
    }

    #[test]
    fn link_loop_is_an_error() {
        let fs = MockFileSystem::new();
        fs.add_symlink("/proj/a", "/proj/b");
        fs.add_symlink("/proj/b", "/proj/a");

        assert!(resolver(&fs).resolve(Path::new("/proj/a")).is_err());
    }

    #[test]
    fn unexpected_errors_propagate() {
        let fs = MockFileSystem::new();
        fs.add_file("/proj/a", 1000);
        fs.fail_with("/proj/a", io::ErrorKind::PermissionDenied);

        let err = resolver(&fs).resolve(Path::new("/proj/a")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
