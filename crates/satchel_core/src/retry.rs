//! Retry controller with exponential backoff.

use crate::queue::QueuedMutation;
use tracing::{debug, warn};

/// Backoff parameters for failed transmissions.
///
/// All three knobs are configuration inputs, never hardcoded by the
/// engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Initial backoff unit in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed backoff delay.
    pub max_delay_ms: u64,
    /// Failure count at which a mutation is abandoned instead of retried.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Creates a new retry policy.
    #[must_use]
    pub const fn new(base_delay_ms: u64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_retries,
        }
    }

    /// Computes the backoff delay for the given failure count:
    /// `base * 2^retry_count`, capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> u64 {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(1_000, 60_000, 5)
    }
}

/// The retry controller's decision for a failed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryVerdict {
    /// Retry later; the mutation carries its updated failure count and
    /// eligibility time and must be requeued.
    Requeue(QueuedMutation),
    /// The retry ceiling was reached; the mutation is terminally failed
    /// and must be removed from the queue, never silently dropped.
    Abandon(QueuedMutation),
}

/// Tracks failure counts per queued mutation and computes backoff delays.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Creates a controller with the given policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Records a transient failure for a mutation.
    ///
    /// Increments the failure count and either schedules the next attempt
    /// (`next_eligible_at` strictly increases) or abandons the mutation
    /// once the count reaches `max_retries`.
    pub fn record_failure(&self, mut mutation: QueuedMutation, now: u64) -> RetryVerdict {
        mutation.retry_count += 1;

        if mutation.retry_count > self.policy.max_retries {
            warn!(
                mutation = %mutation.id,
                retries = mutation.retry_count,
                "retry ceiling reached, abandoning mutation"
            );
            return RetryVerdict::Abandon(mutation);
        }

        let delay = self.policy.delay_for(mutation.retry_count - 1);
        let next = now.saturating_add(delay.max(1));
        // Eligibility must move forward even if the clock did not.
        mutation.next_eligible_at = next.max(mutation.next_eligible_at + 1);

        debug!(
            mutation = %mutation.id,
            retries = mutation.retry_count,
            next_eligible_at = mutation.next_eligible_at,
            "scheduling retry"
        );
        RetryVerdict::Requeue(mutation)
    }

    /// Records a successful transmission.
    ///
    /// Clears the failure count. Idempotent: calling it twice for the same
    /// mutation leaves it unchanged.
    pub fn record_success(&self, mutation: &mut QueuedMutation) {
        mutation.retry_count = 0;
    }
}
