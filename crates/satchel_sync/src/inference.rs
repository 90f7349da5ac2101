//! AI inference boundary.
//!
//! Summarization, error explanation and schedule generation are simple
//! request/response calls to an external inference service. The engine
//! treats them like any other remote operation: a failed or offline call
//! goes through the same queue and retry discipline as a failed push.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use satchel_core::EntryKind;
use std::collections::VecDeque;

/// The result of a successful inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// The generated artifact.
    pub result: Vec<u8>,
    /// How long the call took, as reported by the service.
    pub duration_ms: u64,
}

/// Boundary to the external inference service.
pub trait InferenceClient: Send + Sync {
    /// Generates an artifact of the given kind from the input payload.
    fn invoke(&self, kind: EntryKind, payload: &[u8]) -> SyncResult<InferenceOutput>;
}

/// A scripted inference client for tests.
///
/// Outcomes are consumed in order; when the script is empty, calls
/// succeed with a canned transformation of the input.
#[derive(Default)]
pub struct MockInference {
    script: Mutex<VecDeque<SyncResult<InferenceOutput>>>,
    invocations: Mutex<Vec<(EntryKind, Vec<u8>)>>,
}

impl MockInference {
    /// Creates a mock that succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outcome of the next unscripted call.
    pub fn script(&self, outcome: SyncResult<InferenceOutput>) {
        self.script.lock().push_back(outcome);
    }

    /// Scripts `n` consecutive retryable failures.
    pub fn script_transient_failures(&self, n: usize) {
        for _ in 0..n {
            self.script(Err(SyncError::transport_retryable("inference unavailable")));
        }
    }

    /// Returns the recorded invocations.
    #[must_use]
    pub fn invocations(&self) -> Vec<(EntryKind, Vec<u8>)> {
        self.invocations.lock().clone()
    }
}

impl InferenceClient for MockInference {
    fn invoke(&self, kind: EntryKind, payload: &[u8]) -> SyncResult<InferenceOutput> {
        self.invocations.lock().push((kind, payload.to_vec()));
        if let Some(outcome) = self.script.lock().pop_front() {
            return outcome;
        }
        let mut result = b"generated:".to_vec();
        result.extend_from_slice(payload);
        Ok(InferenceOutput {
            result,
            duration_ms: 10,
        })
    }
}
