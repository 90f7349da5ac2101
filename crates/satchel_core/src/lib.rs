//! # Satchel Core
//!
//! Leaf subsystems of the Satchel offline engine.
//!
//! This crate provides:
//! - Content store with LRU eviction and integrity checking
//! - Durable mutation queue with priority ordering and coalescing
//! - Retry controller with exponential backoff
//! - Notification feed for user-visible obligations
//! - Engine configuration and clock abstraction
//!
//! ## Key invariants
//!
//! - A read never waits on network: TTL staleness is advisory
//! - `Pending` entries are never evicted
//! - At most one queued mutation per target entry
//! - Mutations leave the queue exactly once, never silently

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod entry;
mod error;
mod eviction;
mod notify;
mod queue;
mod retry;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, TtlDefaults};
pub use entry::{CachedEntry, EntryKind, SyncStatus};
pub use error::{CoreError, CoreResult};
pub use eviction::EvictionPolicy;
pub use notify::{Notification, NotificationFeed, SequencedNotification, WinnerSource};
pub use queue::{MutationOp, MutationQueue, QueuedMutation};
pub use retry::{RetryController, RetryPolicy, RetryVerdict};
pub use store::ContentStore;
pub use types::{EntryId, MutationId, OwnerId, Priority};
