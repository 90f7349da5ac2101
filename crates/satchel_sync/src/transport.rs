//! Remote store boundary.
//!
//! The remote persistent store is an external collaborator; the engine
//! only sees the narrow interface below. Its internal schema is out of
//! scope, so the types here carry exactly the fields conflict resolution
//! and cache seeding need.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use satchel_core::{EntryId, EntryKind, MutationId, MutationOp, OwnerId, QueuedMutation};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A remote version of a logical entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// The entity's id (same keyspace as local entries).
    pub entry_id: EntryId,
    /// The user the entity belongs to.
    pub owner: OwnerId,
    /// Kind of artifact.
    pub kind: EntryKind,
    /// The remote payload.
    pub payload: Vec<u8>,
    /// Remote modification time (ms since epoch). Drives last-write-wins.
    pub updated_at: u64,
    /// Remote version counter.
    pub version: u64,
    /// True if the entity was deleted remotely.
    pub deleted: bool,
}

/// A transmission request for one queued mutation.
///
/// `mutation_id` is the idempotency key: the remote store must treat a
/// replayed request with the same id as already applied, so a mutation
/// retried from scratch after a pause is safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Idempotency key.
    pub mutation_id: MutationId,
    /// The targeted entity.
    pub target: EntryId,
    /// The remote effect.
    pub op: MutationOp,
    /// Payload to apply.
    pub payload: Vec<u8>,
    /// The local version's modification time, for conflict detection.
    pub local_updated_at: u64,
}

impl PushRequest {
    /// Builds a push request from a queued mutation.
    #[must_use]
    pub fn from_mutation(mutation: &QueuedMutation, local_updated_at: u64) -> Self {
        Self {
            mutation_id: mutation.id,
            target: mutation.target,
            op: mutation.op,
            payload: mutation.payload.clone(),
            local_updated_at,
        }
    }
}

/// The remote store's answer to an accepted push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    /// The mutation was applied remotely.
    Accepted {
        /// The entity's new remote version.
        remote_version: u64,
    },
    /// The remote store holds a concurrent version of the entity; the
    /// client must resolve and write back the winner.
    Conflict {
        /// The remote version.
        remote: RemoteEntry,
    },
}

/// Network boundary to the remote persistent store.
///
/// Implementations are free to speak any protocol; the engine cares only
/// about these three operations. All calls are suspension points: the
/// host may deliver events while one is in flight.
pub trait RemoteStore: Send + Sync {
    /// Transmits one mutation.
    fn push(&self, request: &PushRequest) -> SyncResult<PushOutcome>;

    /// Returns remote entries for an owner modified after `since`
    /// (ms since epoch). Used to seed the cache on new-device login.
    fn pull(&self, owner: OwnerId, since: u64) -> SyncResult<Vec<RemoteEntry>>;

    /// Fetches a single entity, if it exists remotely. Used to re-pull a
    /// record discarded by corruption recovery.
    fn fetch(&self, entry_id: EntryId) -> SyncResult<Option<RemoteEntry>>;
}

/// A scripted remote store for tests.
///
/// Push outcomes are consumed from a queue in order; when the queue is
/// empty every push is accepted. All requests are recorded.
#[derive(Default)]
pub struct MockRemote {
    push_script: Mutex<VecDeque<SyncResult<PushOutcome>>>,
    pushed: Mutex<Vec<PushRequest>>,
    pull_entries: Mutex<Vec<RemoteEntry>>,
    fetch_script: Mutex<VecDeque<SyncResult<Option<RemoteEntry>>>>,
    fetchable: Mutex<HashMap<EntryId, RemoteEntry>>,
    next_version: Mutex<u64>,
}

impl MockRemote {
    /// Creates a mock that accepts every push.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome of the next unscripted push.
    pub fn script_push(&self, outcome: SyncResult<PushOutcome>) {
        self.push_script.lock().push_back(outcome);
    }

    /// Scripts `n` consecutive retryable transport failures.
    pub fn script_transient_failures(&self, n: usize) {
        for _ in 0..n {
            self.script_push(Err(SyncError::transport_retryable("simulated outage")));
        }
    }

    /// Sets the entries returned by `pull`.
    pub fn set_pull_entries(&self, entries: Vec<RemoteEntry>) {
        *self.pull_entries.lock() = entries;
    }

    /// Scripts the outcome of the next unscripted fetch.
    pub fn script_fetch(&self, outcome: SyncResult<Option<RemoteEntry>>) {
        self.fetch_script.lock().push_back(outcome);
    }

    /// Makes an entry available to `fetch`.
    pub fn set_fetchable(&self, entry: RemoteEntry) {
        self.fetchable.lock().insert(entry.entry_id, entry);
    }

    /// Returns all recorded push requests.
    #[must_use]
    pub fn pushed(&self) -> Vec<PushRequest> {
        self.pushed.lock().clone()
    }

    /// Returns the number of recorded push requests.
    #[must_use]
    pub fn push_count(&self) -> usize {
        self.pushed.lock().len()
    }
}

impl RemoteStore for MockRemote {
    fn push(&self, request: &PushRequest) -> SyncResult<PushOutcome> {
        self.pushed.lock().push(request.clone());
        if let Some(outcome) = self.push_script.lock().pop_front() {
            return outcome;
        }
        let mut version = self.next_version.lock();
        *version += 1;
        Ok(PushOutcome::Accepted {
            remote_version: *version,
        })
    }

    fn pull(&self, _owner: OwnerId, since: u64) -> SyncResult<Vec<RemoteEntry>> {
        Ok(self
            .pull_entries
            .lock()
            .iter()
            .filter(|e| e.updated_at > since)
            .cloned()
            .collect())
    }

    fn fetch(&self, entry_id: EntryId) -> SyncResult<Option<RemoteEntry>> {
        if let Some(outcome) = self.fetch_script.lock().pop_front() {
            return outcome;
        }
        Ok(self.fetchable.lock().get(&entry_id).cloned())
    }
}
