//! Engine configuration.

use crate::entry::EntryKind;
use crate::retry::RetryPolicy;

/// Default TTLs per entry kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlDefaults {
    /// TTL for summaries.
    pub summary_ms: u64,
    /// TTL for error explanations.
    pub explanation_ms: u64,
    /// TTL for schedules.
    pub schedule_ms: u64,
    /// TTL for raw uploaded documents.
    pub raw_document_ms: u64,
}

impl TtlDefaults {
    /// Returns the default TTL for the given kind.
    #[must_use]
    pub const fn for_kind(&self, kind: EntryKind) -> u64 {
        match kind {
            EntryKind::Summary => self.summary_ms,
            EntryKind::Explanation => self.explanation_ms,
            EntryKind::Schedule => self.schedule_ms,
            EntryKind::RawDocument => self.raw_document_ms,
        }
    }
}

impl Default for TtlDefaults {
    fn default() -> Self {
        Self {
            summary_ms: 24 * 60 * 60 * 1000,      // 1 day
            explanation_ms: 24 * 60 * 60 * 1000,  // 1 day
            schedule_ms: 60 * 60 * 1000,          // 1 hour; schedules go stale fast
            raw_document_ms: 7 * 24 * 60 * 60 * 1000, // 1 week
        }
    }
}

/// Configuration for the offline engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry/backoff policy for queued mutations.
    pub retry: RetryPolicy,
    /// Alternative retry policy applied while the host signals
    /// Low-Data-Mode. `None` keeps the normal policy.
    pub low_data_retry: Option<RetryPolicy>,
    /// Content store size above which eviction starts.
    pub high_water_mark_bytes: u64,
    /// Content store size eviction drives down to (hysteresis).
    pub low_water_mark_bytes: u64,
    /// Default TTLs per entry kind.
    pub ttl_defaults: TtlDefaults,
    /// Interval for the periodic sync tick while online.
    pub periodic_sync_interval_ms: u64,
    /// Maximum accepted payload size; larger uploads are rejected with a
    /// validation error before being stored or queued.
    pub max_payload_bytes: u64,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the Low-Data-Mode retry policy override.
    #[must_use]
    pub const fn with_low_data_retry(mut self, retry: RetryPolicy) -> Self {
        self.low_data_retry = Some(retry);
        self
    }

    /// Sets the eviction watermarks.
    #[must_use]
    pub const fn with_watermarks(mut self, high: u64, low: u64) -> Self {
        self.high_water_mark_bytes = high;
        self.low_water_mark_bytes = low;
        self
    }

    /// Sets the default TTLs.
    #[must_use]
    pub const fn with_ttl_defaults(mut self, ttl: TtlDefaults) -> Self {
        self.ttl_defaults = ttl;
        self
    }

    /// Sets the periodic sync interval.
    #[must_use]
    pub const fn with_periodic_sync_interval_ms(mut self, interval_ms: u64) -> Self {
        self.periodic_sync_interval_ms = interval_ms;
        self
    }

    /// Sets the maximum accepted payload size.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, bytes: u64) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    /// Returns the retry policy in effect for the given connectivity mode.
    #[must_use]
    pub fn retry_policy(&self, low_data_mode: bool) -> RetryPolicy {
        if low_data_mode {
            self.low_data_retry.unwrap_or(self.retry)
        } else {
            self.retry
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            low_data_retry: None,
            high_water_mark_bytes: 64 * 1024 * 1024, // 64 MB
            low_water_mark_bytes: 48 * 1024 * 1024,  // 48 MB
            ttl_defaults: TtlDefaults::default(),
            periodic_sync_interval_ms: 30_000,
            max_payload_bytes: 8 * 1024 * 1024, // 8 MB
        }
    }
}
