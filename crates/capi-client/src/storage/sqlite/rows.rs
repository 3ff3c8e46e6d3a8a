//! Raw table rows and their conversion into domain models.

use capi_core::{Machine, Signal, Source};

use crate::storage::StorageError;

#[derive(Debug, sqlx::FromRow)]
pub(super) struct MachineRow {
    pub machine_id: String,
    pub password: String,
    pub token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub scenarios: String,
    pub is_registered: i64,
    pub is_failing: i64,
    pub last_failure_count: i64,
    pub receive_bad_requests: i64,
}

impl MachineRow {
    pub(super) fn into_machine(self) -> Result<Machine, StorageError> {
        let last_failure_count = u32::try_from(self.last_failure_count).map_err(|_| {
            StorageError::Serialization(format!(
                "machine {} has invalid failure count {}",
                self.machine_id, self.last_failure_count
            ))
        })?;

        Ok(Machine {
            scenarios: serde_json::from_str(&self.scenarios)?,
            machine_id: self.machine_id,
            password: self.password,
            token: self.token,
            token_expires_at: self.token_expires_at,
            is_registered: self.is_registered != 0,
            is_failing: self.is_failing != 0,
            last_failure_count,
            receive_bad_requests: self.receive_bad_requests != 0,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct SignalRow {
    pub id: i64,
    pub machine_id: String,
    pub uuid: String,
    pub scenario: String,
    pub scenario_hash: String,
    pub scenario_version: String,
    pub scenario_trust: String,
    pub message: String,
    pub created_at: i64,
    pub start_at: Option<i64>,
    pub stop_at: Option<i64>,
    pub source: Option<String>,
    pub context: String,
    pub decisions: String,
    pub sent: i64,
    pub alert_id: Option<i64>,
}

impl SignalRow {
    pub(super) fn into_signal(self) -> Result<Signal, StorageError> {
        let source: Option<Source> = self
            .source
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Signal {
            id: Some(self.id),
            machine_id: self.machine_id,
            uuid: self.uuid,
            scenario: self.scenario,
            scenario_hash: self.scenario_hash,
            scenario_version: self.scenario_version,
            scenario_trust: self.scenario_trust,
            message: self.message,
            created_at: self.created_at,
            start_at: self.start_at,
            stop_at: self.stop_at,
            source,
            context: serde_json::from_str(&self.context)?,
            decisions: serde_json::from_str(&self.decisions)?,
            sent: self.sent != 0,
            alert_id: self.alert_id,
        })
    }
}

/// JSON-encoded columns of a signal, ready to bind.
pub(super) struct SignalColumns {
    pub source: Option<String>,
    pub context: String,
    pub decisions: String,
}

impl SignalColumns {
    pub(super) fn encode(signal: &Signal) -> Result<Self, StorageError> {
        Ok(Self {
            source: signal
                .source
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            context: serde_json::to_string(&signal.context)?,
            decisions: serde_json::to_string(&signal.decisions)?,
        })
    }
}
