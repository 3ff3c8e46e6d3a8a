//! `SQLite` storage backend.
//!
//! Machines and signals live in two tables linked by a foreign key without
//! cascade. JSON columns hold scenarios, source, context and decisions.

mod queries;
mod rows;

capi_core::define_database!(SqliteStorage, "Signal store migrations complete");
