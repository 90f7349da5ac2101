//! Core type definitions for Satchel.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Content-derived identifier for a cached entry.
///
/// Entry IDs are SHA-256 digests over the entry's identity (kind, owner,
/// payload), so re-processing identical input maps to the same entry
/// instead of duplicating it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId([u8; 32]);

impl EntryId {
    /// Creates an entry ID from raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives the entry ID for the given content identity.
    #[must_use]
    pub fn derive(kind_code: u8, owner: OwnerId, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([kind_code]);
        hasher.update(owner.as_bytes());
        hasher.update(payload);
        Self(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to identify an entry in logs.
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

/// Unique identifier for a queued mutation.
///
/// Mutation IDs are UUIDs; their `Ord` impl provides the deterministic
/// final tie-break in queue ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId([u8; 16]);

impl MutationId {
    /// Creates a new random mutation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Creates a mutation ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MutationId({})", Uuid::from_bytes(self.0))
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

/// Identifier for the user an entry belongs to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId([u8; 16]);

impl OwnerId {
    /// Creates a new random owner ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    /// Creates an owner ID from raw bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", Uuid::from_bytes(self.0))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Uuid::from_bytes(self.0))
    }
}

/// Transmission priority of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Transmitted before everything else.
    High,
    /// Default priority.
    Medium,
    /// Transmitted last.
    Low,
}

impl Priority {
    /// Returns the numeric rank used for queue ordering (lower drains first).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    /// Returns the higher of two priorities.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }

    /// Converts from a numeric rank.
    #[must_use]
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Priority::High),
            1 => Some(Priority::Medium),
            2 => Some(Priority::Low),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_is_deterministic() {
        let owner = OwnerId::from_bytes([1u8; 16]);
        let a = EntryId::derive(1, owner, b"the same document");
        let b = EntryId::derive(1, owner, b"the same document");
        assert_eq!(a, b);
    }

    #[test]
    fn entry_id_varies_with_identity() {
        let owner = OwnerId::from_bytes([1u8; 16]);
        let other = OwnerId::from_bytes([2u8; 16]);

        let base = EntryId::derive(1, owner, b"doc");
        assert_ne!(base, EntryId::derive(2, owner, b"doc"));
        assert_ne!(base, EntryId::derive(1, other, b"doc"));
        assert_ne!(base, EntryId::derive(1, owner, b"other doc"));
    }

    #[test]
    fn mutation_id_is_unique() {
        assert_ne!(MutationId::new(), MutationId::new());
    }

    #[test]
    fn mutation_id_ordering_is_total() {
        let a = MutationId::from_bytes([0u8; 16]);
        let b = MutationId::from_bytes([1u8; 16]);
        assert!(a < b);
    }

    #[test]
    fn priority_ranks() {
        assert_eq!(Priority::High.rank(), 0);
        assert_eq!(Priority::Medium.rank(), 1);
        assert_eq!(Priority::Low.rank(), 2);
        assert!(Priority::High.rank() < Priority::Low.rank());
    }

    #[test]
    fn priority_max_never_downgrades() {
        assert_eq!(Priority::Low.max(Priority::High), Priority::High);
        assert_eq!(Priority::High.max(Priority::Low), Priority::High);
        assert_eq!(Priority::Medium.max(Priority::Medium), Priority::Medium);
    }

    #[test]
    fn entry_id_display_is_short_hex() {
        let id = EntryId::from_bytes([0xAB; 32]);
        let s = format!("{id}");
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
