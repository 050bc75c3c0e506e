use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use proptest::prelude::*;
use watchpack::fs::FileSystem;
use watchpack::fs::mock::MockFileSystem;
use watchpack::types::{TimeInfo, TimeInfoEntries, merge_time_info};
use watchpack::watch::links::SymlinkResolver;

// A chain link_0 -> link_1 -> ... -> link_{n-1} -> target, each link
// either absolute or relative to its directory.
fn chain_strategy(max_links: usize) -> impl Strategy<Value = Vec<bool>> {
    proptest::collection::vec(any::<bool>(), 1..=max_links)
}

proptest! {
    #[test]
    fn resolver_finds_target_and_every_link(absolute in chain_strategy(8)) {
        let fs = MockFileSystem::new();
        fs.add_file("/proj/target", 1_000);
        let n = absolute.len();
        for (i, abs) in absolute.iter().enumerate() {
            let next = if i + 1 == n { "target".to_string() } else { format!("link_{}", i + 1) };
            let pointee = if *abs { PathBuf::from("/proj").join(&next) } else { PathBuf::from(&next) };
            fs.add_symlink(format!("/proj/link_{i}"), pointee);
        }

        let shared: Arc<dyn FileSystem> = Arc::new(fs);
        let mut resolver = SymlinkResolver::new(shared);
        let resolved = resolver.resolve(&PathBuf::from("/proj/link_0")).unwrap();

        prop_assert_eq!(&resolved.target, &PathBuf::from("/proj/target"));
        let links: BTreeSet<PathBuf> = resolved.links.iter().cloned().collect();
        let expected: BTreeSet<PathBuf> =
            (0..n).map(|i| PathBuf::from(format!("/proj/link_{i}"))).collect();
        prop_assert_eq!(links, expected);
    }

    #[test]
    fn merged_time_info_keeps_the_latest_safe_time(
        left in proptest::collection::vec((0..5u8, 0..10_000u64), 0..10),
        right in proptest::collection::vec((0..5u8, 0..10_000u64), 0..10),
    ) {
        let build = |entries: &[(u8, u64)]| -> TimeInfoEntries {
            entries
                .iter()
                .map(|(name, t)| (PathBuf::from(format!("/p/{name}")), Some(TimeInfo::directory(*t))))
                .collect()
        };
        let mut merged = build(&left);
        merge_time_info(&mut merged, build(&right));

        for (name, _) in left.iter().chain(&right) {
            let path = PathBuf::from(format!("/p/{name}"));
            let best = build(&left).get(&path).cloned().flatten().map(|i| i.safe_time)
                .into_iter()
                .chain(build(&right).get(&path).cloned().flatten().map(|i| i.safe_time))
                .max();
            let got = merged.get(&path).cloned().flatten().map(|i| i.safe_time);
            prop_assert_eq!(got, best);
        }
    }
}
