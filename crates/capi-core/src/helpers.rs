//! Helpers for deriving machine identifiers and building well-formed signals.

use chrono::{DateTime, NaiveDateTime};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{Context, Decision, Signal, Source};

/// Default number of hex characters kept from the key digest.
pub const MACHINE_ID_LENGTH: usize = 48;

/// Derive a deterministic machine id from a secret key.
///
/// The id is `prefix` followed by the first `length` hex characters of
/// `SHA-256(prefix + key)`.
pub fn generate_machine_id_from_key(key: &str, prefix: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let hashed = &digest[..length.min(digest.len())];
    format!("{prefix}{hashed}")
}

/// Optional attributes of a signal built by [`create_signal`].
#[derive(Debug, Clone, Default)]
pub struct SignalOptions {
    pub uuid: Option<String>,
    pub message: String,
    pub scenario_hash: String,
    pub scenario_version: String,
    pub scenario_trust: Option<String>,
    pub start_at: Option<i64>,
    pub stop_at: Option<i64>,
    pub context: Vec<Context>,
    pub decisions: Vec<Decision>,
}

/// Build an unsent signal for `attacker_ip`.
///
/// `created_at` accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS[ ]±zzzz`; naive
/// timestamps are taken as UTC. Start and stop default to the creation time.
pub fn create_signal(
    attacker_ip: &str,
    scenario: &str,
    created_at: &str,
    machine_id: &str,
    options: SignalOptions,
) -> Result<Signal> {
    let created_at = parse_timestamp(created_at)?;

    Ok(Signal {
        id: None,
        machine_id: machine_id.to_string(),
        uuid: options
            .uuid
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        scenario: scenario.to_string(),
        scenario_hash: options.scenario_hash,
        scenario_version: options.scenario_version,
        scenario_trust: options
            .scenario_trust
            .unwrap_or_else(|| "manual".to_string()),
        message: options.message,
        created_at,
        start_at: Some(options.start_at.unwrap_or(created_at)),
        stop_at: Some(options.stop_at.unwrap_or(created_at)),
        source: Some(Source::ip(attacker_ip)),
        context: options.context,
        decisions: options.decisions,
        sent: false,
        alert_id: None,
    })
}

/// Parse a timestamp into unix seconds (UTC).
pub fn parse_timestamp(input: &str) -> Result<i64> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(input, format) {
            return Ok(dt.timestamp());
        }
    }
    NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc().timestamp())
        .map_err(|_| Error::InvalidTimestamp(input.to_string()))
}
