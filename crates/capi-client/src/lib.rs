//! CAPI client engine.
//!
//! Stages signals reported by security-engine machines, keeps each machine
//! registered with a fresh token, delivers signals in bounded batches and
//! quarantines machines that keep failing.
//!
//! - [`storage`]: persistence contract with `SQLite` and in-memory backends
//! - [`transport`]: remote API contract and its reqwest implementation
//! - [`auth`]: registration, login and token freshness
//! - [`sender`]: batching, failure quarantine and pruning
//! - [`CapiClient`]: the facade embedding services drive

pub mod auth;
pub mod client;
pub mod enroll;
pub mod error;
pub mod sender;
pub mod storage;
pub mod transport;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use client::CapiClient;
pub use enroll::{EnrollOutcome, EnrollRequest};
pub use error::{ClientError, Result};
pub use storage::{MemoryStorage, SignalChanges, SqliteStorage, Storage, StorageError};
pub use transport::{ApiRequest, ApiResponse, Endpoint, HttpTransport, Transport, TransportError};
