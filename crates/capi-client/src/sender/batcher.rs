//! Signal batcher: delivers pending signals of healthy machines in bounded
//! batches and reconciles local state with the outcome.

use std::time::Duration;

use capi_core::models::format_timestamp;
use capi_core::{ClientConfig, Machine, Signal};
use tracing::{debug, info, warn};

use super::quarantine::FailurePolicy;
use crate::auth::{Clock, CredentialManager};
use crate::error::{ClientError, Result};
use crate::storage::{SignalChanges, Storage};
use crate::transport::{ApiRequest, Endpoint, Transport};

/// Pending signals of one machine, oldest first.
type MachineQueue = (String, Vec<Signal>);

pub struct SignalBatcher<'a, S, T, C> {
    storage: &'a S,
    transport: &'a T,
    clock: &'a C,
    config: &'a ClientConfig,
    credentials: CredentialManager<'a, S, T, C>,
    policy: FailurePolicy,
}

impl<'a, S: Storage, T: Transport, C: Clock> SignalBatcher<'a, S, T, C> {
    pub const fn new(storage: &'a S, transport: &'a T, clock: &'a C, config: &'a ClientConfig) -> Self {
        Self {
            storage,
            transport,
            clock,
            config,
            credentials: CredentialManager::new(storage, transport, clock, config),
            policy: FailurePolicy::new(config.max_retries),
        }
    }

    /// Run one send cycle. Returns the number of signals marked sent.
    ///
    /// A machine that fails is charged one failure and skipped until the next
    /// cycle; only storage errors abort the cycle.
    pub async fn send_signals(&self) -> Result<usize> {
        let queues = self.pending_by_machine().await?;
        if queues.is_empty() {
            debug!("No pending signals");
            return Ok(0);
        }

        let mut total = 0;
        for (machine_id, signals) in &queues {
            total += self.send_machine_signals(machine_id, signals).await?;
        }

        info!(machines = queues.len(), sent = total, "Signal send cycle complete");
        Ok(total)
    }

    /// All unsent signals of non-failing machines, grouped per machine in
    /// order of first appearance.
    async fn pending_by_machine(&self) -> Result<Vec<MachineQueue>> {
        let batch_size = self.config.batch_size;
        let mut queues: Vec<MachineQueue> = Vec::new();
        let mut offset = 0u32;

        loop {
            let page = self
                .storage
                .get_signals(batch_size, offset, Some(false), Some(false))
                .await?;
            let page_len = page.len();

            for signal in page {
                match queues.iter_mut().find(|(id, _)| *id == signal.machine_id) {
                    Some((_, queue)) => queue.push(signal),
                    None => queues.push((signal.machine_id.clone(), vec![signal])),
                }
            }

            if page_len < batch_size as usize {
                break;
            }
            offset = offset.saturating_add(batch_size);
        }

        Ok(queues)
    }

    async fn send_machine_signals(&self, machine_id: &str, signals: &[Signal]) -> Result<usize> {
        let mut sent = 0;
        let mut delivered: Option<(Machine, String)> = None;

        for chunk in signals.chunks(self.config.batch_size as usize) {
            // Another writer may have quarantined the machine since the cycle started.
            let Some(mut machine) = self.storage.get_machine(machine_id).await? else {
                warn!(machine_id = %machine_id, "Signals reference an unknown machine, skipping");
                break;
            };
            if machine.is_failing {
                debug!(machine_id = %machine_id, "Machine quarantined, its signals stay local");
                break;
            }

            let token = match self.credentials.prepare_machine(&mut machine).await {
                Ok(token) => token,
                Err(e) if e.counts_as_send_failure() => {
                    warn!(machine_id = %machine_id, error = %e, "Cannot authenticate machine, skipping this cycle");
                    self.policy.record_failure(self.storage, machine_id).await?;
                    return Ok(sent);
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.post_chunk(&token, chunk).await {
                if !e.counts_as_send_failure() {
                    return Err(e);
                }
                warn!(
                    machine_id = %machine_id,
                    batch = chunk.len(),
                    error = %e,
                    "Failed to send signals, remaining signals kept for next cycle"
                );
                if e.status() == Some(401) {
                    self.storage.clear_token(machine_id).await?;
                }
                self.policy.record_failure(self.storage, machine_id).await?;
                return Ok(sent);
            }

            let ids: Vec<i64> = chunk.iter().filter_map(|s| s.id).collect();
            let marked = self
                .storage
                .mass_update_signals(&ids, SignalChanges::mark_sent())
                .await?;
            sent += usize::try_from(marked).unwrap_or(usize::MAX);
            let machine = self.policy.record_success(self.storage, machine_id).await?;
            delivered = Some((machine, token));
        }

        if let Some((machine, token)) = delivered {
            info!(machine_id = %machine_id, count = sent, "Signals sent");
            if self.config.send_metrics {
                self.push_metrics(&machine, &token).await;
            }
        }
        Ok(sent)
    }

    async fn post_chunk(&self, token: &str, chunk: &[Signal]) -> Result<()> {
        let payload: Vec<_> = chunk.iter().map(Signal::to_payload).collect();
        let request = ApiRequest::new(Endpoint::Signals)
            .json(serde_json::to_value(&payload)?)
            .bearer(token);

        let response = self.transport.send(request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(ClientError::Api {
                status: response.status,
                message: response.error_message(),
            })
        }
    }

    /// Report machine activity, trying up to `max_retries + 1` times.
    /// Failures are logged and otherwise ignored.
    async fn push_metrics(&self, machine: &Machine, token: &str) {
        let now = format_timestamp(self.clock.now());
        let body = serde_json::json!({
            "bouncers": [],
            "machines": [{
                "name": machine.machine_id,
                "version": env!("CARGO_PKG_VERSION"),
                "last_push": now,
                "last_update": now,
            }],
        });
        let attempts = self.config.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let request = ApiRequest::new(Endpoint::Metrics)
                .json(body.clone())
                .bearer(token);

            match self.transport.send(request).await {
                Ok(response) if response.is_success() => {
                    debug!(machine_id = %machine.machine_id, attempt, "Metrics pushed");
                    return;
                }
                Ok(response) => warn!(
                    machine_id = %machine.machine_id,
                    status = response.status,
                    attempt,
                    "Metrics push rejected"
                ),
                Err(e) => warn!(
                    machine_id = %machine.machine_id,
                    error = %e,
                    attempt,
                    "Metrics push failed"
                ),
            }

            if attempt < attempts {
                tokio::time::sleep(Duration::from_secs(self.config.retry_delay)).await;
            }
        }
    }
}
