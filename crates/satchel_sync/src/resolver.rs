//! Conflict resolution.
//!
//! Resolution is a pure function of the two versions: the same inputs
//! always produce the same winner, independent of call order. That is
//! what makes retries safe (a replayed push that conflicts again
//! resolves identically) and tests reproducible.

use crate::transport::RemoteEntry;
use satchel_core::{CachedEntry, WinnerSource};

/// The outcome of resolving a local/remote conflict.
///
/// The loser is never discarded silently: the note carries both
/// timestamps and the winning side so the orchestrator can raise a
/// user-visible `ConflictResolved` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Which side won.
    pub winner: WinnerSource,
    /// `updated_at` of the local version.
    pub local_updated_at: u64,
    /// `updated_at` of the remote version.
    pub remote_updated_at: u64,
}

/// Resolves a conflict between a local and a remote version of the same
/// logical entity.
///
/// Policy: last-write-wins by `updated_at`. Ties prefer the remote
/// version, since the remote store is the point of multi-device
/// convergence.
#[must_use]
pub fn resolve(local: &CachedEntry, remote: &RemoteEntry) -> Resolution {
    let winner = if local.updated_at > remote.updated_at {
        WinnerSource::Local
    } else {
        WinnerSource::Remote
    };
    Resolution {
        winner,
        local_updated_at: local.updated_at,
        remote_updated_at: remote.updated_at,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use satchel_core::WinnerSource;

    proptest! {
        /// The winner is a pure function of the two timestamps, and the
        /// losing side is never the strictly newer one.
        #[test]
        fn winner_is_never_strictly_older(local_at in 0u64..10_000, remote_at in 0u64..10_000) {
            let l = super::tests::local(local_at);
            let r = super::tests::remote(remote_at);

            let first = resolve(&l, &r);
            let second = resolve(&l, &r);
            prop_assert_eq!(first, second);

            match first.winner {
                WinnerSource::Local => prop_assert!(local_at > remote_at),
                WinnerSource::Remote => prop_assert!(remote_at >= local_at),
            }
        }
    }
}
