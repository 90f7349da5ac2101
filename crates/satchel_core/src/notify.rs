//! Notification obligations emitted by the engine.
//!
//! The engine never formats or displays anything: it emits notification
//! obligations and guarantees they are observable. Presentation layers
//! subscribe to the feed (or poll it by cursor) and render what they see.

use crate::types::EntryId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};

/// Which side won a conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinnerSource {
    /// The local version was kept.
    Local,
    /// The remote version overwrote the local one.
    Remote,
}

/// A notification obligation raised by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// A conflict between local and remote versions was resolved.
    ConflictResolved {
        /// The affected entry.
        entry_id: EntryId,
        /// Which side won.
        winner: WinnerSource,
        /// `updated_at` of the local version at resolution time.
        local_updated_at: u64,
        /// `updated_at` of the remote version at resolution time.
        remote_updated_at: u64,
    },
    /// A mutation was abandoned after exhausting retries or hitting a
    /// permanent rejection. Never emitted silently: the owning entry's
    /// status is `Failed` by the time this is observable.
    SyncAbandoned {
        /// The affected entry.
        entry_id: EntryId,
        /// Why the mutation was abandoned.
        reason: String,
    },
    /// A write was rejected because the store is over capacity and no
    /// evictable entry remains.
    StorageFull,
    /// Corrupted records were discarded and recovered from the remote
    /// store where possible.
    CacheCorruptionRecovered {
        /// The discarded entries.
        entry_ids: Vec<EntryId>,
    },
}

/// A notification paired with its feed sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedNotification {
    /// Position in the feed, starting at 1.
    pub sequence: u64,
    /// The notification.
    pub notification: Notification,
}

/// Distributes notification obligations to subscribers.
///
/// The feed preserves emission order, supports multiple subscribers, and
/// keeps a bounded history for pull-based consumers that poll by cursor.
pub struct NotificationFeed {
    subscribers: RwLock<Vec<Sender<SequencedNotification>>>,
    history: RwLock<Vec<SequencedNotification>>,
    next_sequence: RwLock<u64>,
    max_history: usize,
}

impl NotificationFeed {
    /// Creates a new feed with the default history limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a feed with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: RwLock::new(1),
            max_history,
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that observes all future notifications.
    pub fn subscribe(&self) -> Receiver<SequencedNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a notification to all subscribers and the history buffer.
    pub fn emit(&self, notification: Notification) -> u64 {
        let sequence = {
            let mut next = self.next_sequence.write();
            let seq = *next;
            *next += 1;
            seq
        };
        let event = SequencedNotification {
            sequence,
            notification,
        };

        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        sequence
    }

    /// Returns notifications with sequence greater than the cursor.
    #[must_use]
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<SequencedNotification> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the sequence of the most recent notification.
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history.read().len())
            .finish_non_exhaustive()
    }
}
