//! In-memory storage backend for tests and embedding.
//!
//! Mirrors the `SQLite` backend, including the foreign key between signals
//! and machines. Each call holds the lock for its whole duration, so bulk
//! mutations are atomic with respect to readers.

use std::collections::BTreeMap;

use capi_core::{Machine, Signal};
use tokio::sync::RwLock;

use super::{SignalChanges, Storage, StorageError};

#[derive(Default)]
struct State {
    /// Kept in creation order.
    machines: Vec<Machine>,
    signals: BTreeMap<i64, Signal>,
    next_signal_id: i64,
}

impl State {
    fn machine(&self, machine_id: &str) -> Option<&Machine> {
        self.machines.iter().find(|m| m.machine_id == machine_id)
    }

    fn is_failing(&self, machine_id: &str) -> Option<bool> {
        self.machine(machine_id).map(|m| m.is_failing)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    async fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>, StorageError> {
        Ok(self.state.read().await.machine(machine_id).cloned())
    }

    async fn list_machines(&self, is_failing: Option<bool>) -> Result<Vec<Machine>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .machines
            .iter()
            .filter(|m| is_failing.is_none_or(|f| m.is_failing == f))
            .cloned()
            .collect())
    }

    async fn update_or_create_machine(&self, machine: Machine) -> Result<Machine, StorageError> {
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .machines
            .iter_mut()
            .find(|m| m.machine_id == machine.machine_id)
        {
            let (token, token_expires_at) = if machine.token.is_some() {
                (machine.token, machine.token_expires_at)
            } else {
                (existing.token.take(), existing.token_expires_at)
            };
            *existing = Machine {
                token,
                token_expires_at,
                ..machine
            };
            return Ok(existing.clone());
        }

        state.machines.push(machine.clone());
        Ok(machine)
    }

    async fn clear_token(&self, machine_id: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        if let Some(machine) = state
            .machines
            .iter_mut()
            .find(|m| m.machine_id == machine_id)
        {
            machine.token = None;
            machine.token_expires_at = None;
        }
        Ok(())
    }

    async fn delete_machines(&self, machine_ids: &[String]) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;

        if let Some(owner) = state
            .signals
            .values()
            .find(|s| machine_ids.contains(&s.machine_id))
        {
            return Err(StorageError::Constraint(format!(
                "machine {} still owns signals",
                owner.machine_id
            )));
        }

        let before = state.machines.len();
        state
            .machines
            .retain(|m| !machine_ids.contains(&m.machine_id));
        Ok((before - state.machines.len()) as u64)
    }

    async fn get_signals(
        &self,
        limit: u32,
        offset: u32,
        sent: Option<bool>,
        is_failing: Option<bool>,
    ) -> Result<Vec<Signal>, StorageError> {
        let state = self.state.read().await;

        let mut matching: Vec<&Signal> = state
            .signals
            .values()
            .filter(|s| sent.is_none_or(|v| s.sent == v))
            .filter(|s| match is_failing {
                None => true,
                Some(v) => state.is_failing(&s.machine_id) == Some(v),
            })
            .collect();
        matching.sort_by_key(|s| (s.created_at, s.id));

        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn update_or_create_signals(
        &self,
        signals: Vec<Signal>,
    ) -> Result<Vec<Signal>, StorageError> {
        let mut state = self.state.write().await;

        if let Some(orphan) = signals
            .iter()
            .find(|s| state.machine(&s.machine_id).is_none())
        {
            return Err(StorageError::Constraint(format!(
                "unknown machine {}",
                orphan.machine_id
            )));
        }

        let mut stored = Vec::with_capacity(signals.len());
        for mut signal in signals {
            match signal.id {
                Some(id) => {
                    if let Some(existing) = state.signals.get_mut(&id) {
                        if !existing.sent {
                            *existing = signal.clone();
                        }
                    }
                }
                None => {
                    state.next_signal_id += 1;
                    let id = state.next_signal_id;
                    signal.id = Some(id);
                    state.signals.insert(id, signal.clone());
                }
            }
            stored.push(signal);
        }
        Ok(stored)
    }

    async fn mass_update_signals(
        &self,
        ids: &[i64],
        changes: SignalChanges,
    ) -> Result<u64, StorageError> {
        if changes.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        let mut updated = 0;
        for id in ids {
            let Some(signal) = state.signals.get_mut(id) else {
                continue;
            };
            if signal.sent {
                continue;
            }
            if let Some(sent) = changes.sent {
                signal.sent = sent;
            }
            if let Some(alert_id) = changes.alert_id {
                signal.alert_id = Some(alert_id);
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete_signals(&self, ids: &[i64]) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let deleted = ids
            .iter()
            .filter(|id| state.signals.remove(*id).is_some())
            .count();
        Ok(deleted as u64)
    }
}
