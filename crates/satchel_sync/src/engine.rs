//! Sync orchestrator.
//!
//! The orchestrator owns the drain loop: a state machine that reacts to
//! connectivity and timer events, drains the mutation queue one mutation
//! at a time while online, and routes every outcome (acceptance,
//! conflict, transient failure, permanent rejection) to the right
//! subsystem. It is the only component that talks to the remote store
//! and the inference service; the cache and queue never do I/O.
//!
//! The host delivers events from a single thread. Boundary calls are
//! suspension points, so connectivity is re-checked before every attempt
//! rather than once per drain.

use crate::connectivity::ConnectivitySignal;
use crate::error::{SyncError, SyncResult};
use crate::inference::InferenceClient;
use crate::resolver::{self, Resolution};
use crate::transport::{PushOutcome, PushRequest, RemoteEntry, RemoteStore};
use parking_lot::{Mutex, RwLock};
use satchel_core::{
    CachedEntry, Clock, ContentStore, CoreError, EngineConfig, EntryId, EntryKind, EvictionPolicy,
    MutationOp, MutationQueue, Notification, NotificationFeed, OwnerId, Priority, QueuedMutation,
    RetryController, RetryVerdict, SyncStatus, WinnerSource,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The orchestrator's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Online (or never connected) with nothing to transmit.
    Idle,
    /// Actively transmitting queued work.
    Draining,
    /// Offline with work still queued.
    Paused,
}

/// External events the host forwards to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The connectivity signal went online.
    ConnectivityRestored,
    /// The connectivity signal went offline.
    ConnectivityLost,
    /// The periodic sync timer fired.
    TimerTick,
}

/// Counters describing the engine's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Completed drain passes (queue fully drained or backing off).
    pub drains_completed: u64,
    /// Mutations the remote store accepted.
    pub mutations_pushed: u64,
    /// Conflicts resolved, on push or during seeding.
    pub conflicts_resolved: u64,
    /// Transient failures that scheduled a retry.
    pub retries_scheduled: u64,
    /// Mutations abandoned terminally.
    pub abandoned: u64,
    /// Generation requests answered with a cached or fresh artifact.
    pub requests_completed: u64,
    /// Generation requests queued for later replay.
    pub requests_deferred: u64,
    /// Corrupt records discarded and (where possible) re-pulled.
    pub corruption_recoveries: u64,
}

/// The answer to a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Served from cache or generated immediately.
    Completed(CachedEntry),
    /// Queued for replay once connectivity (or the service) returns. The
    /// id is where the artifact will appear.
    Deferred(EntryId),
}

/// Offline-capable sync engine.
///
/// Owns the content store, the mutation queue, the deferred-request
/// queue and the notification feed; borrows the remote store, inference
/// service, connectivity signal and clock from the host.
pub struct SyncEngine<R: RemoteStore, A: InferenceClient> {
    config: EngineConfig,
    store: ContentStore,
    queue: MutationQueue,
    /// Generation requests waiting for connectivity or a healthy
    /// inference service. Same ordering and retry discipline as the
    /// mutation queue, but drained first: replay produces the local
    /// writes the main drain then transmits.
    deferred: MutationQueue,
    /// Kind and owner for each deferred request, keyed by the entry id
    /// the artifact will occupy.
    deferred_meta: Mutex<HashMap<EntryId, (EntryKind, OwnerId)>>,
    feed: NotificationFeed,
    remote: Arc<R>,
    inference: Arc<A>,
    connectivity: Arc<dyn ConnectivitySignal>,
    clock: Arc<dyn Clock>,
    state: RwLock<EngineState>,
    stats: RwLock<SyncStats>,
    low_data_mode: AtomicBool,
}

impl<R: RemoteStore, A: InferenceClient> SyncEngine<R, A> {
    /// Creates an engine with empty local state.
    pub fn new(
        config: EngineConfig,
        remote: Arc<R>,
        inference: Arc<A>,
        connectivity: Arc<dyn ConnectivitySignal>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = EvictionPolicy::new(config.high_water_mark_bytes, config.low_water_mark_bytes);
        Self {
            config,
            store: ContentStore::new(policy, Arc::clone(&clock)),
            queue: MutationQueue::new(),
            deferred: MutationQueue::new(),
            deferred_meta: Mutex::new(HashMap::new()),
            feed: NotificationFeed::new(),
            remote,
            inference,
            connectivity,
            clock,
            state: RwLock::new(EngineState::Idle),
            stats: RwLock::new(SyncStats::default()),
            low_data_mode: AtomicBool::new(false),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Returns a copy of the engine's counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        *self.stats.read()
    }

    /// The content store. Reads through it count as access for eviction.
    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// The mutation queue, for host persistence.
    #[must_use]
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    /// The notification feed.
    #[must_use]
    pub fn notifications(&self) -> &NotificationFeed {
        &self.feed
    }

    /// The number of generation requests waiting for replay.
    #[must_use]
    pub fn deferred_request_count(&self) -> usize {
        self.deferred.len()
    }

    /// Switches the retry policy between normal and Low-Data-Mode.
    ///
    /// Takes effect from the next failure; already scheduled retries
    /// keep their eligibility times.
    pub fn set_low_data_mode(&self, enabled: bool) {
        self.low_data_mode.store(enabled, Ordering::Relaxed);
        info!(enabled, "low data mode changed");
    }

    /// Feeds one host event through the state machine.
    ///
    /// Draining happens synchronously inside this call; the returned
    /// state is the one after any drain completed.
    pub fn handle_event(&self, event: EngineEvent) -> EngineState {
        let current = self.state();
        match (current, event) {
            (EngineState::Draining, EngineEvent::ConnectivityLost) => {
                info!("connectivity lost while draining");
                *self.state.write() = EngineState::Paused;
            }
            // Losing connectivity with nothing in flight needs no action;
            // queued work waits where it is.
            (_, EngineEvent::ConnectivityLost) => {}
            // Redundant restore or tick while a drain is in progress.
            (EngineState::Draining, _) => {}
            (_, EngineEvent::ConnectivityRestored) => self.drain(),
            (_, EngineEvent::TimerTick) => {
                // A tick also recovers from a missed restore event.
                if self.connectivity.is_online() {
                    self.drain();
                }
            }
        }
        self.state()
    }

    /// Drains deferred requests, then the mutation queue, until both are
    /// empty (or backing off) or connectivity drops.
    fn drain(&self) {
        *self.state.write() = EngineState::Draining;
        debug!(
            queued = self.queue.len(),
            deferred = self.deferred.len(),
            "drain started"
        );

        if !self.replay_deferred() {
            info!("drain paused, connectivity lost");
            *self.state.write() = EngineState::Paused;
            return;
        }

        loop {
            if !self.connectivity.is_online() {
                info!("drain paused, connectivity lost");
                *self.state.write() = EngineState::Paused;
                return;
            }
            let now = self.clock.now_ms();
            let Some(mutation) = self.queue.dequeue_next(now) else {
                break;
            };
            self.transmit(mutation, now);
        }

        *self.state.write() = EngineState::Idle;
        self.stats.write().drains_completed += 1;
        debug!(remaining = self.queue.len(), "drain complete");
    }

    /// Transmits one mutation and routes the outcome.
    fn transmit(&self, mutation: QueuedMutation, now: u64) {
        let local_updated_at = self
            .store
            .peek(mutation.target)
            .map_or(mutation.enqueued_at, |e| e.updated_at);
        let request = PushRequest::from_mutation(&mutation, local_updated_at);

        match self.remote.push(&request) {
            Ok(PushOutcome::Accepted { remote_version }) => {
                // An edit may have coalesced onto this mutation while the
                // push was in flight (coalescing keeps the id). What is
                // queued now was never transmitted; leave it for the next
                // loop pass instead of acking it away.
                let superseded = self.queue.pending_for(mutation.target).is_some_and(|c| {
                    c.id == mutation.id && (c.payload != mutation.payload || c.op != mutation.op)
                });
                if superseded {
                    debug!(
                        mutation = %mutation.id,
                        target = %mutation.target,
                        "push accepted but mutation edited in flight, kept queued"
                    );
                    return;
                }
                self.queue.ack(mutation.id);
                if mutation.op != MutationOp::Delete {
                    if let Err(e) = self.store.update(mutation.target, CachedEntry::mark_synced) {
                        debug!(error = %e, "entry gone before sync confirmation");
                    }
                }
                self.stats.write().mutations_pushed += 1;
                debug!(
                    mutation = %mutation.id,
                    target = %mutation.target,
                    remote_version,
                    "mutation accepted"
                );
            }
            Ok(PushOutcome::Conflict { remote }) => {
                self.queue.ack(mutation.id);
                self.apply_conflict(&mutation, remote);
            }
            Err(e) if e.is_retryable() => self.handle_transient_failure(mutation, now, &e),
            Err(e) => {
                warn!(mutation = %mutation.id, error = %e, "permanent rejection");
                self.abandon(&mutation, &e.to_string());
            }
        }
    }

    fn handle_transient_failure(&self, mutation: QueuedMutation, now: u64, error: &SyncError) {
        match self.retry_controller().record_failure(mutation, now) {
            RetryVerdict::Requeue(updated) => {
                // An edit may have coalesced onto the mutation while the
                // push was in flight; keep the newest payload and apply
                // only the retry bookkeeping.
                let current = match self.queue.pending_for(updated.target) {
                    Some(c) if c.id == updated.id => c,
                    _ => {
                        debug!(mutation = %updated.id, "mutation superseded in flight");
                        return;
                    }
                };
                let mut requeued = current;
                requeued.retry_count = updated.retry_count;
                requeued.next_eligible_at = updated.next_eligible_at;
                let id = requeued.id;
                if let Err(e) = self.queue.requeue(id, requeued) {
                    debug!(error = %e, "retry target vanished");
                    return;
                }
                self.stats.write().retries_scheduled += 1;
            }
            RetryVerdict::Abandon(abandoned) => self.abandon(&abandoned, &error.to_string()),
        }
    }

    /// Removes a mutation terminally: the entry is marked `Failed` and a
    /// `SyncAbandoned` notification is emitted, never a silent drop.
    fn abandon(&self, mutation: &QueuedMutation, reason: &str) {
        self.queue.ack(mutation.id);
        if let Err(e) = self.store.update(mutation.target, CachedEntry::mark_failed) {
            // Delete mutations have no local entry to mark.
            debug!(error = %e, "no entry to mark failed");
        }
        self.feed.emit(Notification::SyncAbandoned {
            entry_id: mutation.target,
            reason: reason.to_string(),
        });
        self.stats.write().abandoned += 1;
        warn!(
            mutation = %mutation.id,
            target = %mutation.target,
            reason,
            "mutation abandoned"
        );
    }

    /// Resolves a push conflict and writes the winner on both sides.
    fn apply_conflict(&self, mutation: &QueuedMutation, remote: RemoteEntry) {
        let resolution = match self.store.peek(mutation.target) {
            Some(local) => resolver::resolve(&local, &remote),
            // Local version gone (deleted locally); the remote one stands.
            None => Resolution {
                winner: WinnerSource::Remote,
                local_updated_at: mutation.enqueued_at,
                remote_updated_at: remote.updated_at,
            },
        };

        match resolution.winner {
            WinnerSource::Local => {
                // The remote store holds the losing version; push the
                // local payload again so both sides converge.
                if let Some(local) = self.store.peek(mutation.target) {
                    let now = self.clock.now_ms();
                    self.queue.enqueue(QueuedMutation::new(
                        mutation.target,
                        MutationOp::Update,
                        local.payload,
                        mutation.priority,
                        now,
                    ));
                }
            }
            WinnerSource::Remote => {
                if remote.deleted {
                    self.store.delete(mutation.target);
                } else if self.store.contains(mutation.target) {
                    let payload = remote.payload.clone();
                    if let Err(e) = self.store.update(mutation.target, |e| {
                        e.apply_remote(payload, remote.updated_at);
                    }) {
                        warn!(error = %e, "failed to apply remote winner");
                    }
                } else {
                    let ttl = self.config.ttl_defaults.for_kind(remote.kind);
                    let entry = CachedEntry::with_id(
                        mutation.target,
                        remote.kind,
                        remote.owner,
                        remote.payload,
                        ttl,
                        remote.updated_at,
                    );
                    if let Err(e) = self.put_with_pressure(entry) {
                        warn!(error = %e, "failed to store remote winner");
                    }
                }
            }
        }

        self.feed.emit(Notification::ConflictResolved {
            entry_id: mutation.target,
            winner: resolution.winner,
            local_updated_at: resolution.local_updated_at,
            remote_updated_at: resolution.remote_updated_at,
        });
        self.stats.write().conflicts_resolved += 1;
        info!(
            target = %mutation.target,
            winner = ?resolution.winner,
            "conflict resolved"
        );
    }

    /// Serves a generation request: cache hit, immediate generation, or
    /// deferral when offline or the inference service is unavailable.
    ///
    /// The entry id is derived from the input, so repeated requests for
    /// identical input hit the cache (or coalesce onto one deferred
    /// request) instead of invoking the service again.
    pub fn process_request(
        &self,
        kind: EntryKind,
        owner: OwnerId,
        payload: Vec<u8>,
        priority: Priority,
    ) -> SyncResult<RequestOutcome> {
        self.validate_payload(&payload)?;
        let id = EntryId::derive(kind.to_code(), owner, &payload);

        match self.store.get(id) {
            Ok(Some(entry)) => {
                debug!(entry = %id, "request served from cache");
                self.stats.write().requests_completed += 1;
                return Ok(RequestOutcome::Completed(entry));
            }
            Ok(None) => {}
            Err(CoreError::RecordCorrupt { .. }) => {
                if let Some(entry) = self.recover_corrupt(id)? {
                    self.stats.write().requests_completed += 1;
                    return Ok(RequestOutcome::Completed(entry));
                }
            }
            Err(e) => return Err(e.into()),
        }

        if self.deferred.pending_for(id).is_some() {
            // Same input already queued; coalescing keeps one request.
            return Ok(RequestOutcome::Deferred(id));
        }

        if !self.connectivity.is_online() {
            return self.defer_request(kind, owner, payload, priority, id);
        }

        match self.inference.invoke(kind, &payload) {
            Ok(output) => {
                let entry = self.cache_generated(kind, owner, &payload, output.result, priority)?;
                self.stats.write().requests_completed += 1;
                Ok(RequestOutcome::Completed(entry))
            }
            Err(e) if e.is_retryable() => self.defer_request(kind, owner, payload, priority, id),
            Err(e) => Err(e),
        }
    }

    fn defer_request(
        &self,
        kind: EntryKind,
        owner: OwnerId,
        payload: Vec<u8>,
        priority: Priority,
        id: EntryId,
    ) -> SyncResult<RequestOutcome> {
        let now = self.clock.now_ms();
        self.deferred_meta.lock().insert(id, (kind, owner));
        self.deferred
            .enqueue(QueuedMutation::new(id, MutationOp::Create, payload, priority, now));
        self.stats.write().requests_deferred += 1;
        debug!(entry = %id, kind = ?kind, "request deferred");
        Ok(RequestOutcome::Deferred(id))
    }

    /// Caches a generated artifact as `Pending` and queues its upload.
    fn cache_generated(
        &self,
        kind: EntryKind,
        owner: OwnerId,
        source: &[u8],
        result: Vec<u8>,
        priority: Priority,
    ) -> SyncResult<CachedEntry> {
        let now = self.clock.now_ms();
        let ttl = self.config.ttl_defaults.for_kind(kind);
        let mut entry = CachedEntry::derived(kind, owner, source, result, ttl, now);
        entry.sync_status = SyncStatus::Pending;
        self.put_with_pressure(entry.clone())?;
        self.queue.enqueue(QueuedMutation::new(
            entry.id,
            MutationOp::Create,
            entry.payload.clone(),
            priority,
            now,
        ));
        Ok(entry)
    }

    /// Replays deferred generation requests while online.
    ///
    /// Returns false if connectivity dropped mid-replay.
    fn replay_deferred(&self) -> bool {
        loop {
            if !self.connectivity.is_online() {
                return false;
            }
            let now = self.clock.now_ms();
            let Some(request) = self.deferred.dequeue_next(now) else {
                return true;
            };
            let meta = self.deferred_meta.lock().get(&request.target).copied();
            let Some((kind, owner)) = meta else {
                self.deferred.ack(request.id);
                continue;
            };

            match self.inference.invoke(kind, &request.payload) {
                Ok(output) => {
                    self.deferred.ack(request.id);
                    self.deferred_meta.lock().remove(&request.target);
                    match self.cache_generated(
                        kind,
                        owner,
                        &request.payload,
                        output.result,
                        request.priority,
                    ) {
                        Ok(_) => self.stats.write().requests_completed += 1,
                        Err(e) => warn!(error = %e, "generated artifact could not be cached"),
                    }
                }
                Err(e) if e.is_retryable() => {
                    match self.retry_controller().record_failure(request, now) {
                        RetryVerdict::Requeue(updated) => {
                            let id = updated.id;
                            let target = updated.target;
                            if self.deferred.requeue(id, updated).is_err() {
                                self.deferred_meta.lock().remove(&target);
                            } else {
                                self.stats.write().retries_scheduled += 1;
                            }
                        }
                        RetryVerdict::Abandon(abandoned) => {
                            self.deferred.ack(abandoned.id);
                            self.deferred_meta.lock().remove(&abandoned.target);
                            self.feed.emit(Notification::SyncAbandoned {
                                entry_id: abandoned.target,
                                reason: e.to_string(),
                            });
                            self.stats.write().abandoned += 1;
                            warn!(entry = %abandoned.target, "deferred request abandoned");
                        }
                    }
                }
                Err(e) => {
                    self.deferred.ack(request.id);
                    self.deferred_meta.lock().remove(&request.target);
                    self.feed.emit(Notification::SyncAbandoned {
                        entry_id: request.target,
                        reason: e.to_string(),
                    });
                    self.stats.write().abandoned += 1;
                    warn!(entry = %request.target, error = %e, "deferred request rejected");
                }
            }
        }
    }

    /// Reads an entry, self-healing from the remote store when the local
    /// record fails its integrity check.
    pub fn read(&self, id: EntryId) -> SyncResult<Option<CachedEntry>> {
        match self.store.get(id) {
            Ok(entry) => Ok(entry),
            Err(CoreError::RecordCorrupt { .. }) => self.recover_corrupt(id),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-pulls a record the store discarded as corrupt.
    fn recover_corrupt(&self, id: EntryId) -> SyncResult<Option<CachedEntry>> {
        warn!(entry = %id, "corrupt record discarded, attempting re-pull");
        // The record is already gone; raise the obligation before the
        // re-pull, which may itself fail.
        self.feed.emit(Notification::CacheCorruptionRecovered { entry_ids: vec![id] });
        self.stats.write().corruption_recoveries += 1;

        if !self.connectivity.is_online() {
            return Ok(None);
        }
        let Some(remote) = self.remote.fetch(id)? else {
            return Ok(None);
        };
        if remote.deleted {
            return Ok(None);
        }
        let ttl = self.config.ttl_defaults.for_kind(remote.kind);
        let entry = CachedEntry::with_id(
            id,
            remote.kind,
            remote.owner,
            remote.payload,
            ttl,
            remote.updated_at,
        );
        self.put_with_pressure(entry)?;
        Ok(self.store.peek(id))
    }

    /// Records a local edit to a cached entry and queues its upload.
    pub fn record_local_edit(
        &self,
        id: EntryId,
        payload: Vec<u8>,
        priority: Priority,
    ) -> SyncResult<()> {
        self.validate_payload(&payload)?;
        let now = self.clock.now_ms();
        self.store
            .update(id, |e| e.apply_local_edit(payload.clone(), now))?;
        self.queue
            .enqueue(QueuedMutation::new(id, MutationOp::Update, payload, priority, now));
        for victim in self.store.maybe_evict() {
            debug!(entry = %victim, "evicted under memory pressure");
        }
        Ok(())
    }

    /// Stores a raw uploaded document and queues its transmission.
    pub fn upload_document(
        &self,
        owner: OwnerId,
        payload: Vec<u8>,
        priority: Priority,
    ) -> SyncResult<EntryId> {
        self.validate_payload(&payload)?;
        let now = self.clock.now_ms();
        let ttl = self.config.ttl_defaults.for_kind(EntryKind::RawDocument);
        let mut entry = CachedEntry::new(EntryKind::RawDocument, owner, payload, ttl, now);
        entry.sync_status = SyncStatus::Pending;
        let id = entry.id;
        let queued_payload = entry.payload.clone();
        self.put_with_pressure(entry)?;
        self.queue.enqueue(QueuedMutation::new(
            id,
            MutationOp::Create,
            queued_payload,
            priority,
            now,
        ));
        Ok(id)
    }

    /// Deletes an entry locally and queues the remote delete.
    pub fn delete_entry(&self, id: EntryId, priority: Priority) {
        let now = self.clock.now_ms();
        self.store.delete(id);
        self.queue
            .enqueue(QueuedMutation::new(id, MutationOp::Delete, Vec::new(), priority, now));
    }

    /// Seeds the cache from the remote store, for new-device login.
    ///
    /// Entries already cached locally are reconciled with last-write-wins;
    /// returns how many new entries were stored.
    pub fn seed_from_remote(&self, owner: OwnerId, since: u64) -> SyncResult<usize> {
        let entries = self.remote.pull(owner, since)?;
        let mut stored = 0;
        for remote in entries {
            if remote.deleted {
                self.store.delete(remote.entry_id);
                continue;
            }
            match self.store.peek(remote.entry_id) {
                None => {
                    let ttl = self.config.ttl_defaults.for_kind(remote.kind);
                    let entry = CachedEntry::with_id(
                        remote.entry_id,
                        remote.kind,
                        remote.owner,
                        remote.payload,
                        ttl,
                        remote.updated_at,
                    );
                    self.put_with_pressure(entry)?;
                    stored += 1;
                }
                // Same version on both sides; nothing to reconcile.
                Some(local) if local.updated_at == remote.updated_at => {}
                Some(local) => {
                    let resolution = resolver::resolve(&local, &remote);
                    if resolution.winner == WinnerSource::Remote {
                        // The losing local edit must not be transmitted
                        // later; retire its queued mutation with the entry.
                        if let Some(pending) = self.queue.pending_for(remote.entry_id) {
                            self.queue.ack(pending.id);
                        }
                        let payload = remote.payload.clone();
                        self.store.update(remote.entry_id, |e| {
                            e.apply_remote(payload, remote.updated_at);
                        })?;
                    }
                    self.feed.emit(Notification::ConflictResolved {
                        entry_id: remote.entry_id,
                        winner: resolution.winner,
                        local_updated_at: resolution.local_updated_at,
                        remote_updated_at: resolution.remote_updated_at,
                    });
                    self.stats.write().conflicts_resolved += 1;
                }
            }
        }
        info!(owner = %owner, stored, "cache seeded from remote");
        Ok(stored)
    }

    fn retry_controller(&self) -> RetryController {
        let low_data = self.low_data_mode.load(Ordering::Relaxed);
        RetryController::new(self.config.retry_policy(low_data))
    }

    fn put_with_pressure(&self, entry: CachedEntry) -> SyncResult<()> {
        match self.store.put(entry) {
            Ok(()) => Ok(()),
            Err(CoreError::StorageFull) => {
                self.feed.emit(Notification::StorageFull);
                Err(CoreError::StorageFull.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn validate_payload(&self, payload: &[u8]) -> SyncResult<()> {
        if payload.len() as u64 > self.config.max_payload_bytes {
            return Err(CoreError::validation(format!(
                "payload of {} bytes exceeds limit of {}",
                payload.len(),
                self.config.max_payload_bytes
            ))
            .into());
        }
        Ok(())
    }
}
