//! Path Resolution
//!
//! Rebuilds full paths from the flat set of (reference, parent) links that
//! USN enumeration produces. Needs the complete snapshot of a volume: a
//! leaf's parent may appear anywhere in the raw sequence.

use crate::error::{MftScanError, Result};
use crate::ntfs::UsnEntry;
use crate::scanner::CancelToken;
use crate::volume::{VolumeId, PATH_SEPARATOR};
use std::collections::HashMap;

/// Outcome counters of one resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Entries that received a path
    pub resolved: u64,
    /// Entries whose chain ended at a parent missing from the snapshot
    pub dangling: u64,
    /// Entries whose chain revisited a reference; left without a path
    pub cyclic: u64,
    /// Records replaced by a later record with the same reference
    pub duplicates: u64,
}

/// Resolution state of one slot
enum Memo {
    Unvisited,
    /// On the chain currently being climbed
    InChain,
    Resolved { path: String, dangling: bool },
    Cyclic,
}

/// Where a climb stopped
enum Anchor {
    Resolved { path: String, dangling: bool },
    Dangling,
    Cycle,
}

/// Slots between two cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Resolves the paths of one volume's entries
pub struct PathResolver<'a> {
    volume: &'a VolumeId,
    entries: Vec<UsnEntry>,
    index: HashMap<u64, usize>,
    stats: ResolveStats,
}

impl<'a> PathResolver<'a> {
    /// Index the raw entries. A later record with an already-seen reference
    /// replaces the earlier one in place.
    pub fn new(volume: &'a VolumeId, raw: impl IntoIterator<Item = UsnEntry>) -> Self {
        let raw = raw.into_iter();
        let mut entries: Vec<UsnEntry> = Vec::with_capacity(raw.size_hint().0);
        let mut index: HashMap<u64, usize> = HashMap::with_capacity(raw.size_hint().0);
        let mut stats = ResolveStats::default();

        for entry in raw {
            match index.get(&entry.file_reference) {
                Some(&slot) => {
                    tracing::debug!(
                        volume = %volume,
                        reference = format_args!("0x{:016X}", entry.file_reference),
                        "duplicate reference, keeping later record '{}' over '{}'",
                        entry.name,
                        entries[slot].name
                    );
                    stats.duplicates += 1;
                    entries[slot] = entry;
                }
                None => {
                    index.insert(entry.file_reference, entries.len());
                    entries.push(entry);
                }
            }
        }

        Self {
            volume,
            entries,
            index,
            stats,
        }
    }

    /// Assign `full_path` to every entry and return them with the counters.
    ///
    /// Each slot is climbed at most once: a climb stops at the first ancestor
    /// already resolved (or known to loop) and the chain below it is filled
    /// in on the way back down. Returns `Cancelled` if `cancel` is raised
    /// before every slot is resolved.
    pub fn resolve(self, cancel: &CancelToken) -> Result<(Vec<UsnEntry>, ResolveStats)> {
        let mut memo: Vec<Memo> = (0..self.entries.len()).map(|_| Memo::Unvisited).collect();
        let mut chain: Vec<usize> = Vec::new();
        let mut stats = self.stats;

        for slot in 0..self.entries.len() {
            if slot % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(MftScanError::Cancelled);
            }
            if !matches!(memo[slot], Memo::Unvisited) {
                continue;
            }

            chain.clear();
            let anchor = self.climb(slot, &mut memo, &mut chain, &mut stats);

            let (mut path, dangling) = match anchor {
                Anchor::Cycle => {
                    for &s in &chain {
                        tracing::debug!(
                            volume = %self.volume,
                            "parent chain of '{}' loops, leaving it unresolved",
                            self.entries[s].name
                        );
                        memo[s] = Memo::Cyclic;
                    }
                    stats.cyclic += chain.len() as u64;
                    continue;
                }
                Anchor::Dangling => (self.volume.root_path(), true),
                Anchor::Resolved { path, dangling } => (path, dangling),
            };

            for &s in chain.iter().rev() {
                path = child_path(&path, &self.entries[s].name);
                memo[s] = Memo::Resolved {
                    path: path.clone(),
                    dangling,
                };
                stats.resolved += 1;
                if dangling {
                    stats.dangling += 1;
                }
            }
        }

        let mut entries = self.entries;
        for (entry, state) in entries.iter_mut().zip(memo) {
            entry.full_path = match state {
                Memo::Resolved { path, .. } => Some(path),
                _ => None,
            };
        }

        Ok((entries, stats))
    }

    /// Climb from `slot` until a known slot, the root, a missing parent or a
    /// loop. Unresolved slots passed on the way are pushed to `chain`, leaf first.
    fn climb(
        &self,
        slot: usize,
        memo: &mut [Memo],
        chain: &mut Vec<usize>,
        stats: &mut ResolveStats,
    ) -> Anchor {
        let mut current = slot;

        loop {
            match &memo[current] {
                Memo::Resolved { path, dangling } => {
                    return Anchor::Resolved {
                        path: path.clone(),
                        dangling: *dangling,
                    }
                }
                Memo::Cyclic | Memo::InChain => return Anchor::Cycle,
                Memo::Unvisited => {}
            }

            let entry = &self.entries[current];
            if entry.is_self_parented() {
                let path = self.volume.root_path();
                memo[current] = Memo::Resolved {
                    path: path.clone(),
                    dangling: false,
                };
                stats.resolved += 1;
                return Anchor::Resolved {
                    path,
                    dangling: false,
                };
            }

            memo[current] = Memo::InChain;
            chain.push(current);

            match self.index.get(&entry.parent_reference) {
                Some(&parent) => current = parent,
                None => return Anchor::Dangling,
            }
        }
    }
}

/// Append one name below `parent`; the volume root already ends in a separator
fn child_path(parent: &str, name: &str) -> String {
    let mut path = String::with_capacity(parent.len() + name.len() + 1);
    path.push_str(parent);
    if !parent.ends_with(PATH_SEPARATOR) {
        path.push(PATH_SEPARATOR);
    }
    path.push_str(name);
    path
}

/// Resolve every entry of one volume
pub fn resolve_paths(
    entries: Vec<UsnEntry>,
    volume: &VolumeId,
    cancel: &CancelToken,
) -> Result<(Vec<UsnEntry>, ResolveStats)> {
    PathResolver::new(volume, entries).resolve(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reference: u64, parent: u64, name: &str) -> UsnEntry {
        UsnEntry {
            file_reference: reference,
            parent_reference: parent,
            name: name.to_string(),
            is_deleted: false,
            is_directory: false,
            is_system: false,
            is_temporary: false,
            full_path: None,
        }
    }

    fn resolve(raw: Vec<UsnEntry>, letter: char) -> (Vec<UsnEntry>, ResolveStats) {
        resolve_paths(raw, &VolumeId::new(letter), &CancelToken::new()).unwrap()
    }

    fn path_of<'e>(entries: &'e [UsnEntry], reference: u64) -> Option<&'e str> {
        entries
            .iter()
            .find(|e| e.file_reference == reference)
            .and_then(|e| e.full_path.as_deref())
    }

    #[test]
    fn builds_root_to_leaf_path() {
        let mut dir = entry(2, 1, "A");
        dir.is_directory = true;
        let raw = vec![entry(3, 2, "B.txt"), entry(1, 1, "C:"), dir];

        let (entries, stats) = resolve(raw, 'C');

        assert_eq!(path_of(&entries, 3), Some(r"C:\A\B.txt"));
        assert_eq!(path_of(&entries, 2), Some(r"C:\A"));
        assert_eq!(path_of(&entries, 1), Some(r"C:\"));
        assert_eq!(stats.resolved, 3);
        assert_eq!(stats.dangling, 0);
    }

    #[test]
    fn dangling_parent_roots_under_volume() {
        let (entries, stats) = resolve(vec![entry(10, 999, "X.txt")], 'C');
        assert_eq!(path_of(&entries, 10), Some(r"C:\X.txt"));
        assert_eq!(stats.dangling, 1);
    }

    #[test]
    fn dangling_chain_keeps_known_ancestors() {
        let raw = vec![entry(20, 777, "orphaned"), entry(21, 20, "inner.log")];
        let (entries, _) = resolve(raw, 'E');
        assert_eq!(path_of(&entries, 21), Some(r"E:\orphaned\inner.log"));
    }

    #[test]
    fn indirect_cycle_terminates_unresolved() {
        let raw = vec![
            entry(5, 6, "P"),
            entry(6, 5, "Q"),
            entry(7, 5, "child.txt"),
            entry(8, 8, "."),
            entry(9, 8, "fine.txt"),
        ];
        let (entries, stats) = resolve(raw, 'C');

        assert_eq!(path_of(&entries, 5), None);
        assert_eq!(path_of(&entries, 6), None);
        assert_eq!(path_of(&entries, 7), None);
        assert_eq!(path_of(&entries, 9), Some(r"C:\fine.txt"));
        assert_eq!(stats.cyclic, 3);
        assert_eq!(stats.resolved, 2);
    }

    #[test]
    fn long_cycle_terminates() {
        let n = 500u64;
        let raw: Vec<_> = (0..n).map(|i| entry(i + 100, (i + 1) % n + 100, "d")).collect();
        let (entries, stats) = resolve(raw, 'C');
        assert!(entries.iter().take(10).all(|e| e.full_path.is_none()));
        assert_eq!(stats.cyclic, n);
    }

    #[test]
    fn later_record_wins_on_collision() {
        let raw = vec![
            entry(1, 1, "."),
            entry(2, 1, "old-dir"),
            entry(3, 2, "file.txt"),
            entry(2, 1, "new-dir"),
        ];
        let (entries, stats) = resolve(raw, 'C');

        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|e| e.file_reference == 2).count(), 1);
        assert_eq!(path_of(&entries, 2), Some(r"C:\new-dir"));
        assert_eq!(path_of(&entries, 3), Some(r"C:\new-dir\file.txt"));
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn deep_chain_resolves_every_level() {
        let depth = 3_000u64;
        let mut raw = vec![entry(1, 1, ".")];
        // Leaf first, so the first climb covers the whole chain
        raw.extend((2..=depth + 1).rev().map(|i| entry(i, i - 1, "d")));
        let (entries, stats) = resolve(raw, 'C');

        assert_eq!(stats.resolved, depth + 1);
        assert_eq!(path_of(&entries, 2), Some(r"C:\d"));
        assert_eq!(path_of(&entries, 4), Some(r"C:\d\d\d"));
        let leaf = path_of(&entries, depth + 1).unwrap();
        assert_eq!(leaf.len(), "C:".len() + 2 * depth as usize);
    }

    #[test]
    fn entries_below_a_loop_stay_unresolved() {
        // 12 hangs below the loop and is resolved after the loop is cached
        let raw = vec![entry(10, 11, "L"), entry(11, 10, "M"), entry(12, 11, "under.txt")];
        let (entries, stats) = resolve(raw, 'C');
        assert!(entries.iter().all(|e| e.full_path.is_none()));
        assert_eq!(stats.cyclic, 3);
        assert_eq!(stats.resolved, 0);
    }

    #[test]
    fn cancelled_token_stops_resolution() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let raw = vec![entry(1, 1, "."), entry(2, 1, "a.txt")];

        let result = resolve_paths(raw, &VolumeId::new('C'), &cancel);
        assert!(matches!(result, Err(MftScanError::Cancelled)));
    }

    #[test]
    fn empty_snapshot() {
        let (entries, stats) = resolve(Vec::new(), 'C');
        assert!(entries.is_empty());
        assert_eq!(stats, ResolveStats::default());
    }
}
