//! [`Storage`] implementation for [`SqliteStorage`].

use capi_core::db::unix_timestamp;
use capi_core::{Machine, Signal};

use super::SqliteStorage;
use super::rows::{MachineRow, SignalColumns, SignalRow};
use crate::storage::{SignalChanges, Storage, StorageError};

impl Storage for SqliteStorage {
    // =========================================================================
    // Machine queries
    // =========================================================================

    async fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>, StorageError> {
        sqlx::query_as::<_, MachineRow>("SELECT * FROM machines WHERE machine_id = ?")
            .bind(machine_id)
            .fetch_optional(self.pool())
            .await?
            .map(MachineRow::into_machine)
            .transpose()
    }

    async fn list_machines(&self, is_failing: Option<bool>) -> Result<Vec<Machine>, StorageError> {
        let rows = sqlx::query_as::<_, MachineRow>(
            "SELECT * FROM machines WHERE (? IS NULL OR is_failing = ?) ORDER BY rowid ASC",
        )
        .bind(is_failing)
        .bind(is_failing)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(MachineRow::into_machine).collect()
    }

    async fn update_or_create_machine(&self, machine: Machine) -> Result<Machine, StorageError> {
        let now = unix_timestamp();
        let scenarios = serde_json::to_string(&machine.scenarios)?;

        sqlx::query(
            "INSERT INTO machines (machine_id, password, token, token_expires_at, scenarios, \
             is_registered, is_failing, last_failure_count, receive_bad_requests, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(machine_id) DO UPDATE SET \
             password = excluded.password, \
             token = COALESCE(excluded.token, machines.token), \
             token_expires_at = CASE WHEN excluded.token IS NULL \
                 THEN machines.token_expires_at ELSE excluded.token_expires_at END, \
             scenarios = excluded.scenarios, \
             is_registered = excluded.is_registered, \
             is_failing = excluded.is_failing, \
             last_failure_count = excluded.last_failure_count, \
             receive_bad_requests = excluded.receive_bad_requests, \
             updated_at = excluded.updated_at",
        )
        .bind(&machine.machine_id)
        .bind(&machine.password)
        .bind(&machine.token)
        .bind(machine.token_expires_at)
        .bind(scenarios)
        .bind(machine.is_registered)
        .bind(machine.is_failing)
        .bind(i64::from(machine.last_failure_count))
        .bind(machine.receive_bad_requests)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        self.get_machine(&machine.machine_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("Machine {}", machine.machine_id)))
    }

    async fn clear_token(&self, machine_id: &str) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE machines SET token = NULL, token_expires_at = NULL, updated_at = ? \
             WHERE machine_id = ?",
        )
        .bind(unix_timestamp())
        .bind(machine_id)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    async fn delete_machines(&self, machine_ids: &[String]) -> Result<u64, StorageError> {
        let mut tx = self.pool().begin().await?;
        let mut deleted = 0;

        for machine_id in machine_ids {
            let result = sqlx::query("DELETE FROM machines WHERE machine_id = ?")
                .bind(machine_id.as_str())
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    // =========================================================================
    // Signal queries
    // =========================================================================

    async fn get_signals(
        &self,
        limit: u32,
        offset: u32,
        sent: Option<bool>,
        is_failing: Option<bool>,
    ) -> Result<Vec<Signal>, StorageError> {
        let rows = sqlx::query_as::<_, SignalRow>(
            "SELECT s.* FROM signals s JOIN machines m ON m.machine_id = s.machine_id \
             WHERE (? IS NULL OR s.sent = ?) AND (? IS NULL OR m.is_failing = ?) \
             ORDER BY s.created_at ASC, s.id ASC LIMIT ? OFFSET ?",
        )
        .bind(sent)
        .bind(sent)
        .bind(is_failing)
        .bind(is_failing)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(SignalRow::into_signal).collect()
    }

    async fn update_or_create_signals(
        &self,
        signals: Vec<Signal>,
    ) -> Result<Vec<Signal>, StorageError> {
        let mut tx = self.pool().begin().await?;
        let mut stored = Vec::with_capacity(signals.len());

        for mut signal in signals {
            let columns = SignalColumns::encode(&signal)?;

            if let Some(id) = signal.id {
                sqlx::query(
                    "UPDATE signals SET machine_id = ?, uuid = ?, scenario = ?, scenario_hash = ?, \
                     scenario_version = ?, scenario_trust = ?, message = ?, created_at = ?, \
                     start_at = ?, stop_at = ?, source = ?, context = ?, decisions = ?, \
                     sent = ?, alert_id = ? \
                     WHERE id = ? AND sent = 0",
                )
                .bind(&signal.machine_id)
                .bind(&signal.uuid)
                .bind(&signal.scenario)
                .bind(&signal.scenario_hash)
                .bind(&signal.scenario_version)
                .bind(&signal.scenario_trust)
                .bind(&signal.message)
                .bind(signal.created_at)
                .bind(signal.start_at)
                .bind(signal.stop_at)
                .bind(columns.source)
                .bind(columns.context)
                .bind(columns.decisions)
                .bind(signal.sent)
                .bind(signal.alert_id)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            } else {
                let result = sqlx::query(
                    "INSERT INTO signals (machine_id, uuid, scenario, scenario_hash, scenario_version, \
                     scenario_trust, message, created_at, start_at, stop_at, source, context, \
                     decisions, sent, alert_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&signal.machine_id)
                .bind(&signal.uuid)
                .bind(&signal.scenario)
                .bind(&signal.scenario_hash)
                .bind(&signal.scenario_version)
                .bind(&signal.scenario_trust)
                .bind(&signal.message)
                .bind(signal.created_at)
                .bind(signal.start_at)
                .bind(signal.stop_at)
                .bind(columns.source)
                .bind(columns.context)
                .bind(columns.decisions)
                .bind(signal.sent)
                .bind(signal.alert_id)
                .execute(&mut *tx)
                .await?;
                signal.id = Some(result.last_insert_rowid());
            }

            stored.push(signal);
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn mass_update_signals(
        &self,
        ids: &[i64],
        changes: SignalChanges,
    ) -> Result<u64, StorageError> {
        if ids.is_empty() || changes.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool().begin().await?;
        let mut updated = 0;

        for id in ids {
            let result = sqlx::query(
                "UPDATE signals SET sent = COALESCE(?, sent), alert_id = COALESCE(?, alert_id) \
                 WHERE id = ? AND sent = 0",
            )
            .bind(changes.sent)
            .bind(changes.alert_id)
            .bind(*id)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_signals(&self, ids: &[i64]) -> Result<u64, StorageError> {
        let mut tx = self.pool().begin().await?;
        let mut deleted = 0;

        for id in ids {
            let result = sqlx::query("DELETE FROM signals WHERE id = ?")
                .bind(*id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }
}
