//! Client error type.

use thiserror::Error;

use crate::storage::StorageError;
use crate::transport::TransportError;

/// Errors surfaced by client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Authentication failed for machine {machine_id}: {message}")]
    Authentication { machine_id: String, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Machine {machine_id} registration was rejected by the API")]
    BadRequest { machine_id: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No usable machine available")]
    NoUsableMachine,
}

impl ClientError {
    /// Whether this error is a per-machine delivery failure.
    ///
    /// The batcher turns these into a failure increment for the machine;
    /// anything else aborts the cycle.
    pub const fn counts_as_send_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::Transport(_)
                | Self::Api { .. }
                | Self::BadRequest { .. }
                | Self::Json(_)
        )
    }

    /// HTTP status carried by the error, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<capi_core::Error> for ClientError {
    fn from(e: capi_core::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
