//! Cached entry model.

use crate::types::{EntryId, OwnerId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of artifact a cached entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A generated summary.
    Summary,
    /// A generated error explanation.
    Explanation,
    /// A generated schedule.
    Schedule,
    /// Raw uploaded content.
    RawDocument,
}

impl EntryKind {
    /// Converts to a numeric code (stable, used in id derivation).
    #[must_use]
    pub const fn to_code(self) -> u8 {
        match self {
            EntryKind::Summary => 1,
            EntryKind::Explanation => 2,
            EntryKind::Schedule => 3,
            EntryKind::RawDocument => 4,
        }
    }

    /// Converts from a numeric code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(EntryKind::Summary),
            2 => Some(EntryKind::Explanation),
            3 => Some(EntryKind::Schedule),
            4 => Some(EntryKind::RawDocument),
            _ => None,
        }
    }
}

/// Synchronization status of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// The entry matches the remote store.
    Synced,
    /// The entry has a local change awaiting transmission.
    ///
    /// A `Pending` entry always has a corresponding queued mutation.
    Pending,
    /// Transmission was abandoned after exhausting retries.
    Failed,
}

/// A locally persisted artifact with sync and recency metadata.
///
/// # Invariants
///
/// - `id` is derived from (kind, owner, original payload) and never changes.
/// - `last_accessed_at` is monotonically non-decreasing.
/// - A `Pending` entry has exactly one queued mutation targeting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntry {
    /// Content-derived identifier.
    pub id: EntryId,
    /// Kind of artifact.
    pub kind: EntryKind,
    /// Opaque content blob.
    pub payload: Vec<u8>,
    /// Creation time (ms since epoch).
    pub created_at: u64,
    /// Last modification time (ms since epoch). Drives conflict resolution.
    pub updated_at: u64,
    /// Duration after which the entry is stale and eligible for background
    /// refresh. Staleness never blocks a read.
    pub ttl_ms: u64,
    /// Synchronization status.
    pub sync_status: SyncStatus,
    /// Last read time (ms since epoch). The sole eviction signal.
    pub last_accessed_at: u64,
    /// The user this entry belongs to.
    pub owner: OwnerId,
    /// Integrity checksum over the payload.
    checksum: u64,
}

impl CachedEntry {
    /// Creates a new entry, deriving its id and checksum from the payload.
    ///
    /// Used for raw uploads, where the payload is its own identity.
    #[must_use]
    pub fn new(kind: EntryKind, owner: OwnerId, payload: Vec<u8>, ttl_ms: u64, now: u64) -> Self {
        let id = EntryId::derive(kind.to_code(), owner, &payload);
        Self::with_id(id, kind, owner, payload, ttl_ms, now)
    }

    /// Creates an entry whose id is derived from the *source* content that
    /// produced it, while the payload holds the produced artifact.
    ///
    /// This is the dedupe key for generated artifacts: re-processing
    /// identical input maps to the same entry regardless of what the
    /// generator returned.
    #[must_use]
    pub fn derived(
        kind: EntryKind,
        owner: OwnerId,
        source: &[u8],
        payload: Vec<u8>,
        ttl_ms: u64,
        now: u64,
    ) -> Self {
        let id = EntryId::derive(kind.to_code(), owner, source);
        Self::with_id(id, kind, owner, payload, ttl_ms, now)
    }

    /// Creates an entry under an already known id (remote write-through).
    #[must_use]
    pub fn with_id(
        id: EntryId,
        kind: EntryKind,
        owner: OwnerId,
        payload: Vec<u8>,
        ttl_ms: u64,
        now: u64,
    ) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            id,
            kind,
            payload,
            created_at: now,
            updated_at: now,
            ttl_ms,
            sync_status: SyncStatus::Synced,
            last_accessed_at: now,
            owner,
            checksum,
        }
    }

    /// Returns true if the entry's TTL has elapsed.
    ///
    /// Staleness is advisory: it triggers a background refresh, never a
    /// blocking read.
    #[must_use]
    pub fn is_stale(&self, now: u64) -> bool {
        now.saturating_sub(self.updated_at) > self.ttl_ms
    }

    /// Updates the access time, keeping it monotonically non-decreasing.
    pub fn touch(&mut self, now: u64) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
    }

    /// Replaces the payload with a local edit.
    ///
    /// Bumps `updated_at`, refreshes the checksum and marks the entry
    /// `Pending`. The id is content-derived from the *original* identity
    /// and does not change on edit.
    pub fn apply_local_edit(&mut self, payload: Vec<u8>, now: u64) {
        self.checksum = payload_checksum(&payload);
        self.payload = payload;
        self.updated_at = now.max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
    }

    /// Replaces the payload with a remote version during sync write-back.
    pub fn apply_remote(&mut self, payload: Vec<u8>, remote_updated_at: u64) {
        self.checksum = payload_checksum(&payload);
        self.payload = payload;
        self.updated_at = remote_updated_at;
        self.sync_status = SyncStatus::Synced;
    }

    /// Marks the entry as synced.
    pub fn mark_synced(&mut self) {
        self.sync_status = SyncStatus::Synced;
    }

    /// Marks the entry as failed (sync abandoned).
    pub fn mark_failed(&mut self) {
        self.sync_status = SyncStatus::Failed;
    }

    /// Verifies the payload against the stored checksum.
    #[must_use]
    pub fn verify_integrity(&self) -> bool {
        payload_checksum(&self.payload) == self.checksum
    }

    /// Returns the approximate size of this entry in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        // Payload dominates; metadata is a small fixed overhead.
        self.payload.len() as u64 + 128
    }

    /// Corrupts the stored payload without refreshing the checksum.
    ///
    /// Test hook for exercising corruption recovery.
    #[cfg(any(test, feature = "testing"))]
    pub fn corrupt_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }
}

/// Computes the integrity checksum for a payload.
///
/// First eight bytes of the SHA-256 digest; enough to detect torn or
/// bit-rotted records, not a cryptographic commitment.
fn payload_checksum(payload: &[u8]) -> u64 {
    let digest = Sha256::digest(payload);
    u64::from_be_bytes(digest[..8].try_into().unwrap_or_default())
}
