// src/aggregate/plan.rs

//! Turning a [`WatchSpec`] into the set of paths to watch.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::types::Timestamp;
use crate::watch::links::SymlinkResolver;
use crate::watch::options::NormalizedOptions;

/// What to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSpec {
    pub files: Vec<PathBuf>,
    pub directories: Vec<PathBuf>,
    /// Files expected to be absent; their initial absence is not a removal.
    pub missing: Vec<PathBuf>,
    /// Report entries whose effective time is at or after this point.
    pub start_time: Option<Timestamp>,
}

impl WatchSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    pub fn directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.directories.push(path.into());
        self
    }

    pub fn missing(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing.push(path.into());
        self
    }

    pub fn start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    File,
    Directory,
}

/// Watched path and kind, mapped to the `WatchSpec` items it reports for.
pub type WatchPlan = BTreeMap<(TargetKind, PathBuf), BTreeSet<PathBuf>>;

fn insert(
    plan: &mut WatchPlan,
    options: &NormalizedOptions,
    kind: TargetKind,
    path: &Path,
    item: &Path,
) {
    if options.ignore.is_ignored(path) {
        return;
    }
    plan.entry((kind, path.to_path_buf()))
        .or_default()
        .insert(item.to_path_buf());
}

/// Plan the targets of `spec`.
///
/// With `follow_symlinks`, a file item is watched at its real location and
/// at every link leading there; a directory item is watched recursively at
/// its real location and as a file at every link.
pub fn plan(
    spec: &WatchSpec,
    options: &NormalizedOptions,
    fs: &Arc<dyn FileSystem>,
) -> Result<WatchPlan> {
    let mut plan = WatchPlan::new();
    let mut resolver = options
        .follow_symlinks
        .then(|| SymlinkResolver::new(Arc::clone(fs)));

    for item in spec.files.iter().chain(&spec.missing) {
        if options.ignore.is_ignored(item) {
            continue;
        }
        match resolver.as_mut() {
            Some(resolver) => {
                let resolved = resolver.resolve(item)?;
                for path in resolved.all_paths() {
                    insert(&mut plan, options, TargetKind::File, path, item);
                }
            }
            None => insert(&mut plan, options, TargetKind::File, item, item),
        }
    }

    for item in &spec.directories {
        if options.ignore.is_ignored(item) {
            continue;
        }
        match resolver.as_mut() {
            Some(resolver) => {
                let resolved = resolver.resolve(item)?;
                insert(&mut plan, options, TargetKind::Directory, &resolved.target, item);
                for link in &resolved.links {
                    insert(&mut plan, options, TargetKind::File, link, item);
                }
            }
            None => insert(&mut plan, options, TargetKind::Directory, item, item),
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::watch::options::WatchOptions;
    use crate::watch::patterns::Ignored;

    fn key(kind: TargetKind, path: &str) -> (TargetKind, PathBuf) {
        (kind, PathBuf::from(path))
    }

    fn items(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn plain_spec_maps_items_to_themselves() {
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let options = NormalizedOptions::normalize(&WatchOptions::default()).unwrap();
        let spec = WatchSpec::new()
            .file("/proj/a")
            .missing("/proj/b")
            .directory("/proj/src");

        let plan = plan(&spec, &options, &fs).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[&key(TargetKind::File, "/proj/b")], items(&["/proj/b"]));
        assert_eq!(
            plan[&key(TargetKind::Directory, "/proj/src")],
            items(&["/proj/src"])
        );
    }

    #[test]
    fn ignored_items_are_skipped() {
        let fs: Arc<dyn FileSystem> = Arc::new(MockFileSystem::new());
        let options = NormalizedOptions::normalize(
            &WatchOptions::default().with_ignored(Ignored::globs(["**/node_modules/**"])),
        )
        .unwrap();
        let spec = WatchSpec::new()
            .file("/proj/a")
            .directory("/proj/node_modules");

        let plan = plan(&spec, &options, &fs).unwrap();
        assert_eq!(plan.keys().cloned().collect::<Vec<_>>(), vec![key(
            TargetKind::File,
            "/proj/a"
        )]);
    }

    #[test]
    fn symlinks_expand_into_every_link() {
        let mock = MockFileSystem::new();
        mock.add_file("/proj/c", 1000);
        mock.add_symlink("/proj/b", "/proj/c");
        mock.add_symlink("/proj/a", "/proj/b");
        mock.add_dir("/real/src");
        mock.add_symlink("/proj/src", "/real/src");
        let fs: Arc<dyn FileSystem> = Arc::new(mock);
        let options =
            NormalizedOptions::normalize(&WatchOptions::default().with_follow_symlinks(true))
                .unwrap();
        let spec = WatchSpec::new().file("/proj/a").directory("/proj/src");

        let plan = plan(&spec, &options, &fs).unwrap();
        for path in ["/proj/a", "/proj/b", "/proj/c"] {
            assert_eq!(plan[&key(TargetKind::File, path)], items(&["/proj/a"]));
        }
        assert_eq!(
            plan[&key(TargetKind::Directory, "/real/src")],
            items(&["/proj/src"])
        );
        assert_eq!(plan[&key(TargetKind::File, "/proj/src")], items(&["/proj/src"]));
        assert_eq!(plan.len(), 5);
    }
}
