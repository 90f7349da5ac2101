//! Offline-first sync layer for the satchel cache engine.
//!
//! This crate wires the local subsystems from `satchel_core` (content
//! store, mutation queue, retry controller, notification feed) to the
//! outside world: the remote persistent store, the inference service and
//! the host's connectivity signal. The [`SyncEngine`] orchestrates the
//! whole thing as an event-driven state machine; everything it talks to
//! is a trait, so hosts plug in real transports and tests plug in the
//! bundled mocks.
//!
//! Local operations never block on the network. While offline, edits
//! queue, generation requests defer, and reads come from cache; when
//! connectivity returns the engine drains everything in priority order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connectivity;
mod engine;
mod error;
mod inference;
mod resolver;
mod transport;

pub use connectivity::{ConnectivitySignal, FakeSignal};
pub use engine::{EngineEvent, EngineState, RequestOutcome, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use inference::{InferenceClient, InferenceOutput, MockInference};
pub use resolver::{resolve, Resolution};
pub use transport::{MockRemote, PushOutcome, PushRequest, RemoteEntry, RemoteStore};
