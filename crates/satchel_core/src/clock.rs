//! Clock abstraction for engine timestamps.
//!
//! All timestamps in the engine are milliseconds since the Unix epoch and
//! are taken through an injected [`Clock`]. Production code uses
//! [`SystemClock`]; tests use [`ManualClock`] so backoff schedules, TTL
//! staleness and recency ordering are deterministic.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of engine time, in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<u64>,
}

impl ManualClock {
    /// Creates a clock starting at the given time.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: RwLock::new(now_ms),
        }
    }

    /// Creates a shared clock handle starting at the given time.
    pub fn shared(now_ms: u64) -> Arc<Self> {
        Arc::new(Self::new(now_ms))
    }

    /// Sets the current time.
    ///
    /// Time never moves backwards; setting an earlier time is ignored.
    pub fn set(&self, now_ms: u64) {
        let mut now = self.now.write();
        if now_ms > *now {
            *now = now_ms;
        }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance(&self, delta_ms: u64) {
        *self.now.write() += delta_ms;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.read()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advance() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);

        clock.advance(500);
        assert_eq!(clock.now_ms(), 1500);
    }

    #[test]
    fn manual_clock_never_rewinds() {
        let clock = ManualClock::new(1000);
        clock.set(500);
        assert_eq!(clock.now_ms(), 1000);

        clock.set(2000);
        assert_eq!(clock.now_ms(), 2000);
    }

    #[test]
    fn system_clock_is_nonzero() {
        assert!(SystemClock.now_ms() > 0);
    }

    #[test]
    fn arc_clock_delegates() {
        let clock = ManualClock::shared(42);
        let as_trait: Arc<dyn Clock> = clock.clone();
        assert_eq!(as_trait.now_ms(), 42);
        clock.advance(8);
        assert_eq!(as_trait.now_ms(), 50);
    }
}
