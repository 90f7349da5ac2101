//! LRU eviction policy for the content store.

use crate::entry::{CachedEntry, SyncStatus};
use crate::types::EntryId;

/// Watermark-based LRU eviction policy.
///
/// Eviction starts when the store grows past `high_water_mark_bytes` and
/// removes least-recently-used entries until the size falls to
/// `low_water_mark_bytes`. The gap between the two marks is the hysteresis
/// that prevents eviction thrashing at the boundary.
///
/// Entries with `SyncStatus::Pending` are never selected: evicting them
/// would silently lose the readable context of an unsynced mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Size above which eviction starts.
    pub high_water_mark_bytes: u64,
    /// Size eviction drives down to.
    pub low_water_mark_bytes: u64,
}

impl EvictionPolicy {
    /// Creates a policy with the given watermarks.
    ///
    /// The low water mark is clamped to the high water mark.
    #[must_use]
    pub fn new(high_water_mark_bytes: u64, low_water_mark_bytes: u64) -> Self {
        Self {
            high_water_mark_bytes,
            low_water_mark_bytes: low_water_mark_bytes.min(high_water_mark_bytes),
        }
    }

    /// Returns true if a store of the given size needs eviction.
    #[must_use]
    pub const fn over_high_water(&self, size_bytes: u64) -> bool {
        size_bytes > self.high_water_mark_bytes
    }

    /// Returns true if eviction has brought the size down far enough.
    #[must_use]
    pub const fn at_low_water(&self, size_bytes: u64) -> bool {
        size_bytes <= self.low_water_mark_bytes
    }

    /// Selects the next eviction victim among the given entries.
    ///
    /// The victim is the entry with the smallest `last_accessed_at` whose
    /// status is not `Pending`; ties are broken by id for determinism.
    /// Returns `None` when no entry is evictable.
    pub fn select_victim<'a, I>(&self, entries: I) -> Option<EntryId>
    where
        I: Iterator<Item = &'a CachedEntry>,
    {
        entries
            .filter(|e| e.sync_status != SyncStatus::Pending)
            .min_by_key(|e| (e.last_accessed_at, e.id))
            .map(|e| e.id)
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024, 48 * 1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use crate::types::OwnerId;

    fn entry(n: u8, accessed_at: u64, status: SyncStatus) -> CachedEntry {
        let mut e = CachedEntry::new(
            EntryKind::Summary,
            OwnerId::from_bytes([1u8; 16]),
            vec![n],
            60_000,
            accessed_at,
        );
        e.sync_status = status;
        e
    }

    #[test]
    fn watermark_checks() {
        let policy = EvictionPolicy::new(100, 80);
        assert!(!policy.over_high_water(100));
        assert!(policy.over_high_water(101));
        assert!(policy.at_low_water(80));
        assert!(!policy.at_low_water(81));
    }

    #[test]
    fn low_water_clamped_to_high() {
        let policy = EvictionPolicy::new(100, 200);
        assert_eq!(policy.low_water_mark_bytes, 100);
    }

    #[test]
    fn victim_is_least_recently_used() {
        let policy = EvictionPolicy::default();
        let entries = vec![
            entry(1, 300, SyncStatus::Synced),
            entry(2, 100, SyncStatus::Synced),
            entry(3, 200, SyncStatus::Synced),
        ];

        let victim = policy.select_victim(entries.iter()).unwrap();
        assert_eq!(victim, entries[1].id);
    }

    #[test]
    fn pending_entries_are_never_victims() {
        let policy = EvictionPolicy::default();
        let entries = vec![
            entry(1, 100, SyncStatus::Pending),
            entry(2, 200, SyncStatus::Synced),
        ];

        // The pending entry is older but protected.
        let victim = policy.select_victim(entries.iter()).unwrap();
        assert_eq!(victim, entries[1].id);

        let only_pending = vec![entry(1, 100, SyncStatus::Pending)];
        assert!(policy.select_victim(only_pending.iter()).is_none());
    }

    #[test]
    fn failed_entries_are_evictable() {
        let policy = EvictionPolicy::default();
        let entries = vec![entry(1, 100, SyncStatus::Failed)];
        assert!(policy.select_victim(entries.iter()).is_some());
    }

    #[test]
    fn equal_recency_breaks_ties_by_id() {
        let policy = EvictionPolicy::default();
        let a = entry(1, 100, SyncStatus::Synced);
        let b = entry(2, 100, SyncStatus::Synced);
        let expected = a.id.min(b.id);

        let entries = vec![a, b];
        assert_eq!(policy.select_victim(entries.iter()), Some(expected));
    }
}
