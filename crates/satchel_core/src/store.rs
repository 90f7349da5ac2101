//! Content store: durable key-value store of cached artifacts.

use crate::clock::Clock;
use crate::entry::CachedEntry;
use crate::error::{CoreError, CoreResult};
use crate::eviction::EvictionPolicy;
use crate::types::{EntryId, OwnerId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<EntryId, CachedEntry>,
    total_bytes: u64,
}

impl StoreInner {
    fn remove(&mut self, id: &EntryId) -> Option<CachedEntry> {
        let removed = self.entries.remove(id);
        if let Some(e) = &removed {
            self.total_bytes = self.total_bytes.saturating_sub(e.estimated_size());
        }
        removed
    }

    fn insert(&mut self, entry: CachedEntry) {
        if let Some(old) = self.entries.get(&entry.id) {
            self.total_bytes = self.total_bytes.saturating_sub(old.estimated_size());
        }
        self.total_bytes += entry.estimated_size();
        self.entries.insert(entry.id, entry);
    }
}

/// Durable key-value store of cached artifacts with recency metadata.
///
/// Reads are always served locally: `get` returns the cached value
/// regardless of TTL staleness (staleness is advisory, consumed by the
/// background refresh path). Every successful `get` or `touch` updates
/// `last_accessed_at`, the sole signal consumed by eviction; the store
/// tracks recency, never frequency.
pub struct ContentStore {
    inner: RwLock<StoreInner>,
    policy: EvictionPolicy,
    clock: Arc<dyn Clock>,
}

impl ContentStore {
    /// Creates a store with the given eviction policy and clock.
    pub fn new(policy: EvictionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            policy,
            clock,
        }
    }

    /// Inserts or replaces an entry.
    ///
    /// If the write would push the store past the high water mark,
    /// least-recently-used non-pending entries are evicted first. Fails
    /// with [`CoreError::StorageFull`] when eviction cannot free enough
    /// space; unsynced data is never thrown away to make room.
    pub fn put(&self, entry: CachedEntry) -> CoreResult<()> {
        let mut inner = self.inner.write();

        let incoming = entry.estimated_size();
        let replaced = inner
            .entries
            .get(&entry.id)
            .map(|e| e.estimated_size())
            .unwrap_or(0);

        let projected = |inner: &StoreInner| {
            inner.total_bytes.saturating_sub(replaced) + incoming
        };

        if self.policy.over_high_water(projected(&inner)) {
            self.evict_locked(&mut inner, Some(entry.id), incoming.saturating_sub(replaced));
            if self.policy.over_high_water(projected(&inner)) {
                warn!(entry = %entry.id, size = incoming, "put rejected, storage full");
                return Err(CoreError::StorageFull);
            }
        }

        inner.insert(entry);
        Ok(())
    }

    /// Returns the entry for an id, updating its access time.
    ///
    /// The cached value is returned regardless of TTL; a read never waits
    /// on network or recomputation. A record that fails its integrity
    /// check is discarded and reported as [`CoreError::RecordCorrupt`] so
    /// one bad record never blocks access to the rest of the store.
    pub fn get(&self, id: EntryId) -> CoreResult<Option<CachedEntry>> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write();

        let Some(entry) = inner.entries.get_mut(&id) else {
            return Ok(None);
        };

        if !entry.verify_integrity() {
            warn!(entry = %id, "integrity check failed, discarding record");
            inner.remove(&id);
            return Err(CoreError::RecordCorrupt { id });
        }

        entry.touch(now);
        Ok(Some(entry.clone()))
    }

    /// Updates an entry's access time without reading it.
    pub fn touch(&self, id: EntryId) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write();
        match inner.entries.get_mut(&id) {
            Some(entry) => {
                entry.touch(now);
                Ok(())
            }
            None => Err(CoreError::NotFound { id }),
        }
    }

    /// Removes an entry. Returns true if it existed.
    pub fn delete(&self, id: EntryId) -> bool {
        self.inner.write().remove(&id).is_some()
    }

    /// Returns all entries belonging to an owner.
    ///
    /// Listing does not count as access and leaves recency untouched.
    #[must_use]
    pub fn list_by_owner(&self, owner: OwnerId) -> Vec<CachedEntry> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner
            .entries
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.created_at, e.id));
        entries
    }

    /// Returns the estimated total size of the store in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        self.inner.read().total_bytes
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }

    /// Returns true if an entry exists, without updating recency.
    #[must_use]
    pub fn contains(&self, id: EntryId) -> bool {
        self.inner.read().entries.contains_key(&id)
    }

    /// Returns an entry without counting the read as access.
    ///
    /// Sync internals use this so transmissions and conflict checks do
    /// not distort the recency signal eviction depends on. Records that
    /// fail verification are reported as missing; the user-facing `get`
    /// path owns their discard.
    #[must_use]
    pub fn peek(&self, id: EntryId) -> Option<CachedEntry> {
        self.inner
            .read()
            .entries
            .get(&id)
            .filter(|e| e.verify_integrity())
            .cloned()
    }

    /// Applies a closure to an entry in place.
    ///
    /// Used by the sync layer for status transitions and remote
    /// write-backs; size accounting is refreshed after the closure runs.
    pub fn update<F>(&self, id: EntryId, f: F) -> CoreResult<()>
    where
        F: FnOnce(&mut CachedEntry),
    {
        let mut inner = self.inner.write();
        let Some(mut entry) = inner.remove(&id) else {
            return Err(CoreError::NotFound { id });
        };
        f(&mut entry);
        inner.insert(entry);
        Ok(())
    }

    /// Runs an eviction round if the store is over the high water mark.
    ///
    /// Invoked after writes and on a periodic schedule. Returns the ids of
    /// the evicted entries.
    pub fn maybe_evict(&self) -> Vec<EntryId> {
        let mut inner = self.inner.write();
        self.evict_locked(&mut inner, None, 0)
    }

    /// Returns all entries, for host persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CachedEntry> {
        let inner = self.inner.read();
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    /// Restores the store from persisted state, replacing its contents.
    ///
    /// Records that fail their integrity check are discarded rather than
    /// loaded; their ids are returned so the caller can re-pull them from
    /// the remote store.
    pub fn restore(&self, entries: Vec<CachedEntry>) -> Vec<EntryId> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.total_bytes = 0;

        let mut corrupt = Vec::new();
        for entry in entries {
            if entry.verify_integrity() {
                inner.insert(entry);
            } else {
                warn!(entry = %entry.id, "discarding corrupt record during restore");
                corrupt.push(entry.id);
            }
        }
        corrupt
    }

    /// Evicts LRU non-pending entries while over the high water mark,
    /// driving the size down to the low water mark.
    ///
    /// `exclude` protects the entry currently being written; `headroom`
    /// widens the target so the pending write fits below the high mark.
    fn evict_locked(
        &self,
        inner: &mut StoreInner,
        exclude: Option<EntryId>,
        headroom: u64,
    ) -> Vec<EntryId> {
        let mut evicted = Vec::new();

        loop {
            let size = inner.total_bytes + headroom;
            if !self.policy.over_high_water(size) && (evicted.is_empty() || self.policy.at_low_water(size)) {
                break;
            }

            let victim = self.policy.select_victim(
                inner
                    .entries
                    .values()
                    .filter(|e| Some(e.id) != exclude),
            );
            let Some(victim) = victim else {
                break;
            };

            inner.remove(&victim);
            debug!(entry = %victim, "evicted least-recently-used entry");
            evicted.push(victim);
        }

        if !evicted.is_empty() {
            info!(
                count = evicted.len(),
                size = inner.total_bytes,
                "eviction round complete"
            );
        }
        evicted
    }
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ContentStore")
            .field("entries", &inner.entries.len())
            .field("total_bytes", &inner.total_bytes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entry::{EntryKind, SyncStatus};

    fn make_store(high: u64, low: u64, clock: Arc<ManualClock>) -> ContentStore {
        ContentStore::new(EvictionPolicy::new(high, low), clock)
    }

    fn make_entry(n: u8, payload_len: usize, now: u64) -> CachedEntry {
        CachedEntry::new(
            EntryKind::Summary,
            OwnerId::from_bytes([1u8; 16]),
            vec![n; payload_len],
            60_000,
            now,
        )
    }

    #[test]
    fn put_get_roundtrip() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let entry = make_entry(1, 10, 1_000);
        let id = entry.id;
        store.put(entry.clone()).unwrap();

        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.payload, entry.payload);
        assert!(store.get(EntryId::from_bytes([9u8; 32])).unwrap().is_none());
    }

    #[test]
    fn get_updates_recency_monotonically() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock.clone());

        let entry = make_entry(1, 10, 1_000);
        let id = entry.id;
        store.put(entry).unwrap();

        clock.set(5_000);
        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.last_accessed_at, 5_000);

        clock.set(9_000);
        store.touch(id).unwrap();
        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.last_accessed_at, 9_000);
    }

    #[test]
    fn stale_entries_are_still_served() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock.clone());

        let entry = make_entry(1, 10, 1_000);
        let id = entry.id;
        store.put(entry).unwrap();

        // Far past the TTL: the read still returns the cached value.
        clock.set(10_000_000);
        let got = store.get(id).unwrap().unwrap();
        assert!(got.is_stale(clock.now_ms()));
    }

    #[test]
    fn touch_missing_entry_fails() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);
        let result = store.touch(EntryId::from_bytes([9u8; 32]));
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn delete_and_size_accounting() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let entry = make_entry(1, 100, 1_000);
        let id = entry.id;
        let size = entry.estimated_size();

        store.put(entry).unwrap();
        assert_eq!(store.estimated_size(), size);

        assert!(store.delete(id));
        assert!(!store.delete(id));
        assert_eq!(store.estimated_size(), 0);
    }

    #[test]
    fn replacing_entry_does_not_double_count() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let entry = make_entry(1, 100, 1_000);
        let size = entry.estimated_size();
        store.put(entry.clone()).unwrap();
        store.put(entry).unwrap();
        assert_eq!(store.estimated_size(), size);
    }

    #[test]
    fn list_by_owner_filters_and_sorts() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let owner_a = OwnerId::from_bytes([1u8; 16]);
        let owner_b = OwnerId::from_bytes([2u8; 16]);

        let e1 = CachedEntry::new(EntryKind::Summary, owner_a, vec![1], 60_000, 100);
        let e2 = CachedEntry::new(EntryKind::Schedule, owner_a, vec![2], 60_000, 200);
        let e3 = CachedEntry::new(EntryKind::Summary, owner_b, vec![3], 60_000, 150);
        store.put(e1.clone()).unwrap();
        store.put(e2.clone()).unwrap();
        store.put(e3).unwrap();

        let listed = store.list_by_owner(owner_a);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, e1.id);
        assert_eq!(listed[1].id, e2.id);
    }

    #[test]
    fn eviction_prefers_least_recently_used() {
        let clock = ManualClock::shared(1_000);
        // Each entry is 228 bytes; two fit under the high mark, three do not.
        let store = make_store(600, 500, clock.clone());

        let cold = make_entry(1, 100, 1_000);
        let warm = make_entry(2, 100, 1_000);
        let cold_id = cold.id;
        let warm_id = warm.id;
        store.put(cold).unwrap();
        store.put(warm).unwrap();

        clock.set(2_000);
        store.get(warm_id).unwrap();

        clock.set(3_000);
        store.put(make_entry(3, 100, 3_000)).unwrap();

        assert!(!store.contains(cold_id), "LRU entry should be evicted");
        assert!(store.contains(warm_id));
    }

    #[test]
    fn pending_entries_survive_eviction_pressure() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(600, 500, clock.clone());

        let mut pending = make_entry(1, 100, 1_000);
        pending.sync_status = SyncStatus::Pending;
        let pending_id = pending.id;

        let synced = make_entry(2, 100, 2_000); // more recently accessed
        let synced_id = synced.id;

        store.put(pending).unwrap();
        store.put(synced).unwrap();

        clock.set(3_000);
        store.put(make_entry(3, 100, 3_000)).unwrap();

        // The synced entry goes even though the pending one is older.
        assert!(store.contains(pending_id));
        assert!(!store.contains(synced_id));
    }

    #[test]
    fn storage_full_when_only_pending_remains() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(400, 200, clock);

        let mut pending = make_entry(1, 200, 1_000);
        pending.sync_status = SyncStatus::Pending;
        store.put(pending).unwrap();

        let result = store.put(make_entry(2, 200, 1_000));
        assert!(matches!(result, Err(CoreError::StorageFull)));
        // The unsynced entry was not sacrificed.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_reaches_low_water_mark() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(500_000, 300_000, clock.clone());

        // Ten 50 128-byte entries; the tenth put crosses the high mark.
        let mut ids = Vec::new();
        for i in 0..10u8 {
            clock.advance(1);
            let entry = make_entry(i, 50_000, clock.now_ms());
            ids.push(entry.id);
            store.put(entry).unwrap();
        }

        // Hysteresis drove the size down to the low mark: the five oldest
        // entries were evicted, the five newest remain.
        assert!(store.estimated_size() <= 300_000);
        assert_eq!(store.len(), 5);
        for id in &ids[..5] {
            assert!(!store.contains(*id));
        }
        for id in &ids[5..] {
            assert!(store.contains(*id));
        }

        // Under the high mark, an eviction round is a no-op.
        assert!(store.maybe_evict().is_empty());
    }

    #[test]
    fn corrupt_record_is_discarded_and_reported() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let mut entry = make_entry(1, 10, 1_000);
        let id = entry.id;
        entry.corrupt_payload(vec![0xFF; 10]);
        store.put(entry).unwrap();

        let result = store.get(id);
        assert!(matches!(result, Err(CoreError::RecordCorrupt { id: e }) if e == id));

        // The record is gone; the store keeps working.
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn restore_discards_corrupt_records() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let good = make_entry(1, 10, 1_000);
        let mut bad = make_entry(2, 10, 1_000);
        let bad_id = bad.id;
        bad.corrupt_payload(vec![0u8; 10]);

        let corrupt = store.restore(vec![good.clone(), bad]);
        assert_eq!(corrupt, vec![bad_id]);
        assert!(store.contains(good.id));
        assert!(!store.contains(bad_id));
    }

    #[test]
    fn update_refreshes_size_accounting() {
        let clock = ManualClock::shared(1_000);
        let store = make_store(1 << 20, 1 << 19, clock);

        let entry = make_entry(1, 10, 1_000);
        let id = entry.id;
        store.put(entry).unwrap();
        let before = store.estimated_size();

        store
            .update(id, |e| e.apply_remote(vec![0u8; 500], 2_000))
            .unwrap();
        assert_eq!(store.estimated_size(), before + 490);

        let got = store.get(id).unwrap().unwrap();
        assert_eq!(got.updated_at, 2_000);
        assert_eq!(got.sync_status, SyncStatus::Synced);
    }
}
