//! Durable, ordered queue of pending remote-effecting operations.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntryId, MutationId, Priority};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// The remote effect a queued mutation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    /// Create the entity remotely.
    Create,
    /// Update the entity remotely.
    Update,
    /// Delete the entity remotely.
    Delete,
}

/// A durable record of a pending remote-effecting operation.
///
/// # Invariants
///
/// - `retry_count` strictly increases on each failed attempt.
/// - `next_eligible_at` strictly increases as `retry_count` grows, or the
///   mutation is abandoned.
/// - A mutation leaves the queue exactly once: on confirmed success or on
///   terminal abandonment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Unique mutation ID. Also the idempotency key for transmission.
    pub id: MutationId,
    /// The cached entry this mutation targets (non-owning reference).
    pub target: EntryId,
    /// The remote effect.
    pub op: MutationOp,
    /// Payload to transmit.
    pub payload: Vec<u8>,
    /// Original intent time (ms since epoch). Preserved across coalescing.
    pub enqueued_at: u64,
    /// Transmission priority. Never downgraded by coalescing.
    pub priority: Priority,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Timestamp before which the mutation must not be attempted.
    pub next_eligible_at: u64,
}

impl QueuedMutation {
    /// Creates a new mutation, eligible immediately.
    #[must_use]
    pub fn new(
        target: EntryId,
        op: MutationOp,
        payload: Vec<u8>,
        priority: Priority,
        now: u64,
    ) -> Self {
        Self {
            id: MutationId::new(),
            target,
            op,
            payload,
            enqueued_at: now,
            priority,
            retry_count: 0,
            next_eligible_at: now,
        }
    }

    /// The (priority rank, enqueued_at, id) sort key giving the queue's
    /// stable total order.
    #[must_use]
    pub fn sort_key(&self) -> (u8, u64, MutationId) {
        (self.priority.rank(), self.enqueued_at, self.id)
    }
}

/// Durable, ordered set of pending mutations, keyed by target entry.
///
/// At most one mutation exists per target at any time: repeated edits to
/// the same entity while offline coalesce instead of growing the queue.
#[derive(Debug, Default)]
pub struct MutationQueue {
    by_target: RwLock<HashMap<EntryId, QueuedMutation>>,
}

impl MutationQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a mutation for a target, coalescing with any pending one.
    ///
    /// Coalescing keeps the original `enqueuedAt` (first intent time),
    /// replaces the payload and operation with the newest edit, and raises
    /// the priority to the higher of the two. Returns the id of the
    /// mutation now pending for the target.
    pub fn enqueue(&self, mutation: QueuedMutation) -> MutationId {
        let mut map = self.by_target.write();
        match map.get_mut(&mutation.target) {
            Some(existing) => {
                existing.op = mutation.op;
                existing.payload = mutation.payload;
                existing.priority = existing.priority.max(mutation.priority);
                debug!(target = %existing.target, mutation = %existing.id, "coalesced mutation");
                existing.id
            }
            None => {
                let id = mutation.id;
                debug!(target = %mutation.target, mutation = %id, "enqueued mutation");
                map.insert(mutation.target, mutation);
                id
            }
        }
    }

    /// Returns the next eligible mutation without removing it.
    ///
    /// Order: lowest priority rank first among mutations whose
    /// `next_eligible_at <= now`, ties broken by ascending `enqueued_at`,
    /// then by `id`. Stable: repeated calls without queue mutation return
    /// the same result.
    #[must_use]
    pub fn dequeue_next(&self, now: u64) -> Option<QueuedMutation> {
        let map = self.by_target.read();
        map.values()
            .filter(|m| m.next_eligible_at <= now)
            .min_by_key(|m| m.sort_key())
            .cloned()
    }

    /// Removes a mutation permanently after confirmed success or terminal
    /// abandonment.
    ///
    /// Idempotent: acking an id that is no longer queued is a no-op, so a
    /// duplicate success acknowledgment cannot remove a newer mutation.
    pub fn ack(&self, id: MutationId) {
        let mut map = self.by_target.write();
        map.retain(|_, m| m.id != id);
    }

    /// Puts an updated mutation back in the queue after a transient
    /// failure.
    ///
    /// Fails if the mutation is no longer queued (it was acked or coalesced
    /// away in the meantime).
    pub fn requeue(&self, id: MutationId, updated: QueuedMutation) -> CoreResult<()> {
        let mut map = self.by_target.write();
        match map.get_mut(&updated.target) {
            Some(existing) if existing.id == id => {
                *existing = updated;
                Ok(())
            }
            _ => Err(CoreError::MutationNotFound { id }),
        }
    }

    /// Returns the pending mutation for a target, if any.
    #[must_use]
    pub fn pending_for(&self, target: EntryId) -> Option<QueuedMutation> {
        self.by_target.read().get(&target).cloned()
    }

    /// Returns the number of queued mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_target.read().len()
    }

    /// Returns true if no mutations are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_target.read().is_empty()
    }

    /// Returns all queued mutations in drain order, for host persistence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedMutation> {
        let map = self.by_target.read();
        let mut all: Vec<_> = map.values().cloned().collect();
        all.sort_by_key(|m| m.sort_key());
        all
    }

    /// Restores the queue from persisted state, replacing its contents.
    ///
    /// Later duplicates for the same target win, matching coalescing.
    pub fn restore(&self, mutations: Vec<QueuedMutation>) {
        let mut map = self.by_target.write();
        map.clear();
        for m in mutations {
            map.insert(m.target, m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(n: u8) -> EntryId {
        EntryId::from_bytes([n; 32])
    }

    fn make(target_n: u8, priority: Priority, now: u64) -> QueuedMutation {
        QueuedMutation::new(
            target(target_n),
            MutationOp::Update,
            vec![target_n],
            priority,
            now,
        )
    }

    #[test]
    fn priority_then_age_then_id() {
        let queue = MutationQueue::new();
        queue.enqueue(make(1, Priority::Low, 0));
        queue.enqueue(make(2, Priority::High, 1));
        queue.enqueue(make(3, Priority::High, 0));

        // High beats low; among highs the older wins.
        let first = queue.dequeue_next(10).unwrap();
        assert_eq!(first.target, target(3));

        queue.ack(first.id);
        let second = queue.dequeue_next(10).unwrap();
        assert_eq!(second.target, target(2));

        queue.ack(second.id);
        let third = queue.dequeue_next(10).unwrap();
        assert_eq!(third.target, target(1));
    }

    #[test]
    fn dequeue_is_stable() {
        let queue = MutationQueue::new();
        queue.enqueue(make(1, Priority::Medium, 0));
        queue.enqueue(make(2, Priority::Medium, 0));

        let a = queue.dequeue_next(10).unwrap();
        let b = queue.dequeue_next(10).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn backoff_hides_ineligible_mutations() {
        let queue = MutationQueue::new();
        let mut m = make(1, Priority::High, 0);
        m.next_eligible_at = 5_000;
        queue.enqueue(m);
        queue.enqueue(make(2, Priority::Low, 0));

        // The high-priority mutation is backing off; the low one drains.
        let next = queue.dequeue_next(1_000).unwrap();
        assert_eq!(next.target, target(2));

        // Once eligible, priority order resumes.
        let next = queue.dequeue_next(5_000).unwrap();
        assert_eq!(next.target, target(1));
    }

    #[test]
    fn coalescing_keeps_intent_time_and_raises_priority() {
        let queue = MutationQueue::new();
        let first_id = queue.enqueue(make(1, Priority::Low, 0));

        let mut second = make(1, Priority::High, 5);
        second.payload = vec![9, 9];
        let id = queue.enqueue(second);

        assert_eq!(queue.len(), 1);
        assert_eq!(id, first_id);

        let pending = queue.pending_for(target(1)).unwrap();
        assert_eq!(pending.enqueued_at, 0); // original intent time
        assert_eq!(pending.priority, Priority::High); // raised
        assert_eq!(pending.payload, vec![9, 9]); // newest edit
    }

    #[test]
    fn coalescing_never_downgrades_priority() {
        let queue = MutationQueue::new();
        queue.enqueue(make(1, Priority::High, 0));
        queue.enqueue(make(1, Priority::Low, 5));

        let pending = queue.pending_for(target(1)).unwrap();
        assert_eq!(pending.priority, Priority::High);
    }

    #[test]
    fn ack_is_idempotent_and_exact() {
        let queue = MutationQueue::new();
        let id = queue.enqueue(make(1, Priority::Medium, 0));

        queue.ack(id);
        assert!(queue.is_empty());
        queue.ack(id); // duplicate delivery
        assert!(queue.is_empty());

        // A stale ack must not remove a newer mutation for the same target.
        let new_id = queue.enqueue(make(1, Priority::Medium, 10));
        queue.ack(id);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_for(target(1)).unwrap().id, new_id);
    }

    #[test]
    fn requeue_updates_in_place() {
        let queue = MutationQueue::new();
        let id = queue.enqueue(make(1, Priority::Medium, 0));

        let mut updated = queue.pending_for(target(1)).unwrap();
        updated.retry_count = 1;
        updated.next_eligible_at = 2_000;
        queue.requeue(id, updated).unwrap();

        assert!(queue.dequeue_next(1_000).is_none());
        let m = queue.dequeue_next(2_000).unwrap();
        assert_eq!(m.retry_count, 1);
    }

    #[test]
    fn requeue_after_ack_fails() {
        let queue = MutationQueue::new();
        let id = queue.enqueue(make(1, Priority::Medium, 0));
        let pending = queue.pending_for(target(1)).unwrap();

        queue.ack(id);
        let result = queue.requeue(id, pending);
        assert!(matches!(result, Err(CoreError::MutationNotFound { .. })));
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let queue = MutationQueue::new();
        queue.enqueue(make(1, Priority::Low, 0));
        queue.enqueue(make(2, Priority::High, 1));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        // Snapshot is in drain order.
        assert_eq!(snapshot[0].target, target(2));

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: Vec<QueuedMutation> = serde_json::from_str(&json).unwrap();

        let queue2 = MutationQueue::new();
        queue2.restore(restored);
        assert_eq!(queue2.len(), 2);
        assert_eq!(queue2.dequeue_next(10).unwrap().target, target(2));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::High),
            Just(Priority::Medium),
            Just(Priority::Low),
        ]
    }

    proptest! {
        /// Draining the whole queue yields non-decreasing (rank, enqueued_at)
        /// order regardless of insertion order.
        #[test]
        fn drain_order_is_sorted(
            inputs in prop::collection::vec((0u8..50, arb_priority(), 0u64..1000), 1..40)
        ) {
            let queue = MutationQueue::new();
            for (t, priority, at) in inputs {
                queue.enqueue(QueuedMutation::new(
                    EntryId::from_bytes([t; 32]),
                    MutationOp::Update,
                    vec![t],
                    priority,
                    at,
                ));
            }

            let mut last_key = None;
            while let Some(m) = queue.dequeue_next(u64::MAX) {
                let key = (m.priority.rank(), m.enqueued_at, m.id);
                if let Some(prev) = last_key {
                    prop_assert!(key >= prev);
                }
                last_key = Some(key);
                queue.ack(m.id);
            }
            prop_assert!(queue.is_empty());
        }

        /// Any sequence of enqueues for one target leaves exactly one
        /// mutation, with the first intent time and the maximum priority.
        #[test]
        fn coalescing_invariant(
            edits in prop::collection::vec((arb_priority(), 0u64..1000), 1..20)
        ) {
            let queue = MutationQueue::new();
            let target = EntryId::from_bytes([1u8; 32]);

            let first_at = edits[0].1;
            let max_priority = edits
                .iter()
                .map(|(p, _)| *p)
                .fold(Priority::Low, Priority::max);

            for (priority, at) in &edits {
                queue.enqueue(QueuedMutation::new(
                    target,
                    MutationOp::Update,
                    vec![],
                    *priority,
                    *at,
                ));
            }

            prop_assert_eq!(queue.len(), 1);
            let pending = queue.pending_for(target).unwrap();
            prop_assert_eq!(pending.enqueued_at, first_at);
            prop_assert_eq!(pending.priority.rank(), max_priority.rank());
        }
    }
}
