//! Connectivity signal.
//!
//! Connectivity is an explicit injected dependency with a current-value
//! query and a subscribe interface, never a global flag read ad hoc. The
//! orchestrator queries `is_online` at each drain step; hosts bridge
//! their platform reachability callback into [`FakeSignal::set_online`]
//! (or their own implementation) and forward the subscription events to
//! [`crate::SyncEngine::handle_event`].

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// A boolean-valued connectivity event source.
pub trait ConnectivitySignal: Send + Sync {
    /// Returns the current connectivity state.
    fn is_online(&self) -> bool;

    /// Subscribes to connectivity changes.
    fn subscribe(&self) -> Receiver<bool>;
}

/// A settable connectivity signal.
///
/// Used directly in tests and by hosts that receive reachability
/// callbacks from their platform. Rapid flapping is tolerated: each
/// transition is delivered once, and the orchestrator ignores redundant
/// restore events while already draining.
pub struct FakeSignal {
    online: AtomicBool,
    subscribers: RwLock<Vec<Sender<bool>>>,
    transitions: Mutex<u64>,
}

impl FakeSignal {
    /// Creates a signal with the given initial state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            subscribers: RwLock::new(Vec::new()),
            transitions: Mutex::new(0),
        }
    }

    /// Sets the connectivity state, notifying subscribers on change.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        *self.transitions.lock() += 1;
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(online).is_ok());
    }

    /// Returns how many state transitions have occurred.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        *self.transitions.lock()
    }
}

impl ConnectivitySignal for FakeSignal {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn current_value_query() {
        let signal = FakeSignal::new(true);
        assert!(signal.is_online());

        signal.set_online(false);
        assert!(!signal.is_online());
    }

    #[test]
    fn subscribers_observe_transitions() {
        let signal = FakeSignal::new(true);
        let rx = signal.subscribe();

        signal.set_online(false);
        signal.set_online(true);

        assert!(!rx.recv_timeout(Duration::from_millis(100)).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn redundant_sets_are_not_transitions() {
        let signal = FakeSignal::new(true);
        let rx = signal.subscribe();

        signal.set_online(true);
        signal.set_online(true);
        assert_eq!(signal.transition_count(), 0);
        assert!(rx.try_recv().is_err());
    }
}
