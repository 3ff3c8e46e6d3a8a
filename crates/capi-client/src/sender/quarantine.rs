//! Failure quarantine for machines that keep failing to deliver signals.
//!
//! Counters live in storage only. Each record is a read-modify-write of the
//! stored machine, so nothing is cached between cycles.

use capi_core::Machine;
use tracing::{info, warn};

use crate::storage::{Storage, StorageError};

/// Delivery health of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineHealth {
    Healthy,
    /// Some consecutive failures, still below the threshold.
    Degrading,
    /// Excluded from sending until reset.
    Failing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub max_retries: u32,
}

impl FailurePolicy {
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub const fn health(&self, machine: &Machine) -> MachineHealth {
        if machine.is_failing || machine.last_failure_count >= self.max_retries {
            MachineHealth::Failing
        } else if machine.last_failure_count > 0 {
            MachineHealth::Degrading
        } else {
            MachineHealth::Healthy
        }
    }

    /// Count one failed attempt, quarantining at `max_retries`.
    pub const fn apply_failure(&self, machine: &mut Machine) -> MachineHealth {
        machine.last_failure_count = machine.last_failure_count.saturating_add(1);
        if machine.last_failure_count >= self.max_retries {
            machine.is_failing = true;
        }
        self.health(machine)
    }

    /// A successful delivery clears the counter and any quarantine.
    pub const fn apply_success(machine: &mut Machine) {
        machine.last_failure_count = 0;
        machine.is_failing = false;
    }

    /// Record a failure for the stored machine. Returns the updated record.
    pub async fn record_failure<S: Storage>(
        &self,
        storage: &S,
        machine_id: &str,
    ) -> Result<Machine, StorageError> {
        let mut machine = load(storage, machine_id).await?;
        let was_failing = machine.is_failing;

        if self.apply_failure(&mut machine) == MachineHealth::Failing && !was_failing {
            warn!(
                machine_id = %machine_id,
                failures = machine.last_failure_count,
                max_retries = self.max_retries,
                "Machine quarantined after repeated send failures"
            );
        } else {
            info!(
                machine_id = %machine_id,
                failures = machine.last_failure_count,
                "Send failure recorded"
            );
        }

        storage.update_or_create_machine(machine).await
    }

    /// Record a success for the stored machine. Returns the updated record.
    pub async fn record_success<S: Storage>(
        &self,
        storage: &S,
        machine_id: &str,
    ) -> Result<Machine, StorageError> {
        let mut machine = load(storage, machine_id).await?;
        if self.health(&machine) == MachineHealth::Healthy {
            return Ok(machine);
        }

        Self::apply_success(&mut machine);
        info!(machine_id = %machine_id, "Machine healthy again");
        storage.update_or_create_machine(machine).await
    }
}

async fn load<S: Storage>(storage: &S, machine_id: &str) -> Result<Machine, StorageError> {
    storage
        .get_machine(machine_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("Machine {machine_id}")))
}

/// Delete every unsent signal owned by a failing machine, `batch_size` rows
/// at a time. Returns the number deleted.
pub async fn prune_failing_machines_signals<S: Storage>(
    storage: &S,
    batch_size: u32,
) -> Result<u64, StorageError> {
    let mut total = 0;
    loop {
        let batch = storage
            .get_signals(batch_size, 0, Some(false), Some(true))
            .await?;
        if batch.is_empty() {
            break;
        }
        let ids: Vec<i64> = batch.iter().filter_map(|s| s.id).collect();
        let deleted = storage.delete_signals(&ids).await?;
        if deleted == 0 {
            break;
        }
        total += deleted;
    }

    if total > 0 {
        info!(count = total, "Pruned signals of failing machines");
    }
    Ok(total)
}

/// Delete signals already acknowledged by the remote API, `batch_size` rows
/// at a time. Returns the number deleted.
pub async fn prune_sent_signals<S: Storage>(
    storage: &S,
    batch_size: u32,
) -> Result<u64, StorageError> {
    let mut total = 0;
    loop {
        let batch = storage.get_signals(batch_size, 0, Some(true), None).await?;
        let ids: Vec<i64> = batch.iter().filter_map(|s| s.id).collect();
        if ids.is_empty() {
            break;
        }
        let deleted = storage.delete_signals(&ids).await?;
        if deleted == 0 {
            break;
        }
        total += deleted;
    }

    if total > 0 {
        info!(count = total, "Pruned sent signals");
    }
    Ok(total)
}
