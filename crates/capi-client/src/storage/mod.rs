//! Storage contract for machines and signals, with `SQLite` and in-memory
//! backends.
//!
//! Callers depend only on [`Storage`]. Every bulk mutation is atomic: one
//! transaction for `SQLite`, one write lock for the memory backend.

use std::future::Future;

use capi_core::{Machine, Signal};

mod memory;
mod sqlite;


pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        if let Some(db_err) = e.as_database_error() {
            if db_err.is_foreign_key_violation()
                || db_err.is_unique_violation()
                || db_err.is_check_violation()
            {
                return Self::Constraint(db_err.message().to_string());
            }
        }
        Self::Database(e.to_string())
    }
}

impl From<capi_core::db::DatabaseError> for StorageError {
    fn from(e: capi_core::db::DatabaseError) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Field changes applied to many signals at once.
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalChanges {
    pub sent: Option<bool>,
    pub alert_id: Option<i64>,
}

impl SignalChanges {
    /// Mark signals as acknowledged by the remote API.
    pub const fn mark_sent() -> Self {
        Self {
            sent: Some(true),
            alert_id: None,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.sent.is_none() && self.alert_id.is_none()
    }
}

/// Persistence capability required by the client engine.
///
/// Signals already marked `sent` are never modified again: updates to them
/// are skipped silently, only deletion removes them.
pub trait Storage: Send + Sync {
    fn get_machine(
        &self,
        machine_id: &str,
    ) -> impl Future<Output = Result<Option<Machine>, StorageError>> + Send;

    /// Machines in creation order, optionally filtered by `is_failing`.
    fn list_machines(
        &self,
        is_failing: Option<bool>,
    ) -> impl Future<Output = Result<Vec<Machine>, StorageError>> + Send;

    /// Insert or update a machine keyed by `machine_id`.
    ///
    /// A `None` token keeps the stored token and expiry; use
    /// [`Storage::clear_token`] to drop them.
    fn update_or_create_machine(
        &self,
        machine: Machine,
    ) -> impl Future<Output = Result<Machine, StorageError>> + Send;

    fn clear_token(&self, machine_id: &str)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Signals ordered oldest first (`created_at`, then `id`).
    ///
    /// `is_failing` filters on the owning machine.
    fn get_signals(
        &self,
        limit: u32,
        offset: u32,
        sent: Option<bool>,
        is_failing: Option<bool>,
    ) -> impl Future<Output = Result<Vec<Signal>, StorageError>> + Send;

    /// Insert signals without an id and update unsent signals with one.
    ///
    /// Returns the input signals with their assigned ids.
    fn update_or_create_signals(
        &self,
        signals: Vec<Signal>,
    ) -> impl Future<Output = Result<Vec<Signal>, StorageError>> + Send;

    /// Apply `changes` to every unsent signal in `ids`. Returns rows changed.
    fn mass_update_signals(
        &self,
        ids: &[i64],
        changes: SignalChanges,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    fn delete_signals(&self, ids: &[i64])
    -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Delete machines. Fails with [`StorageError::Constraint`] while any of
    /// them still owns signals.
    fn delete_machines(
        &self,
        machine_ids: &[String],
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;
}
