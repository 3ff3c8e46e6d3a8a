//! CAPI Core Library
//!
//! Shared functionality for the CAPI client crates:
//! - Domain models for machines, signals, tokens and decisions
//! - Client configuration and validation
//! - `SQLite` pool helpers shared by storage backends
//! - Helpers for deriving machine ids and building signals
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod helpers;
pub mod models;
pub mod tracing_init;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use models::{Context, Decision, DecisionStream, Machine, Signal, Source, Token};
