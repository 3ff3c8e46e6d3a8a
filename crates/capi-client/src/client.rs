//! High-level client tying storage, transport and credentials together.

use capi_core::{ClientConfig, DecisionStream, Machine, Signal};
use tracing::{debug, info, warn};

use crate::auth::{Clock, CredentialManager, SystemClock};
use crate::enroll::{EnrollOutcome, EnrollRequest, Enroller};
use crate::error::{ClientError, Result};
use crate::sender::{self, SignalBatcher};
use crate::storage::{Storage, StorageError};
use crate::transport::{ApiRequest, Endpoint, HttpTransport, Transport};

/// Client for the central threat-intelligence API.
///
/// All state lives in the storage backend; the client itself holds only
/// configuration, so operations can be driven from any scheduler.
pub struct CapiClient<S, T, C = SystemClock> {
    storage: S,
    transport: T,
    clock: C,
    config: ClientConfig,
}

impl<S: Storage> CapiClient<S, HttpTransport, SystemClock> {
    /// Client talking HTTPS to the endpoint selected by `config`.
    pub fn with_http(storage: S, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        Self::new(storage, transport, SystemClock, config)
    }
}

impl<S: Storage, T: Transport, C: Clock> CapiClient<S, T, C> {
    pub fn new(storage: S, transport: T, clock: C, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            transport,
            clock,
            config,
        })
    }

    pub const fn storage(&self) -> &S {
        &self.storage
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn credentials(&self) -> CredentialManager<'_, S, T, C> {
        CredentialManager::new(&self.storage, &self.transport, &self.clock, &self.config)
    }

    /// Stored machine, or a fresh unregistered one carrying the configured
    /// scenarios.
    pub async fn get_or_create_machine(&self, machine_id: &str) -> Result<Machine> {
        if let Some(machine) = self.storage.get_machine(machine_id).await? {
            return Ok(machine);
        }
        debug!(machine_id = %machine_id, "Creating machine record");
        let machine = Machine::new(machine_id, self.config.sorted_scenarios());
        Ok(self.storage.update_or_create_machine(machine).await?)
    }

    /// Stage signals for delivery. Unknown machines are created unregistered.
    pub async fn add_signals(&self, signals: Vec<Signal>) -> Result<Vec<Signal>> {
        let mut seen: Vec<&str> = Vec::new();
        for signal in &signals {
            if !seen.contains(&signal.machine_id.as_str()) {
                seen.push(&signal.machine_id);
                self.get_or_create_machine(&signal.machine_id).await?;
            }
        }

        let stored = self.storage.update_or_create_signals(signals).await?;
        info!(count = stored.len(), "Signals staged");
        Ok(stored)
    }

    /// Deliver pending signals of every healthy machine, then prune the
    /// delivered ones when `prune_after_send` is set.
    pub async fn send_signals(&self) -> Result<usize> {
        let sent = SignalBatcher::new(&self.storage, &self.transport, &self.clock, &self.config)
            .send_signals()
            .await?;
        if self.config.prune_after_send {
            self.prune_sent_signals().await?;
        }
        Ok(sent)
    }

    pub async fn prune_failing_machines_signals(&self) -> Result<u64> {
        Ok(sender::prune_failing_machines_signals(&self.storage, self.config.batch_size).await?)
    }

    pub async fn prune_sent_signals(&self) -> Result<u64> {
        Ok(sender::prune_sent_signals(&self.storage, self.config.batch_size).await?)
    }

    /// Pull the decision stream as `machine_id`, or as the configured primary
    /// machine, or as the first healthy stored machine.
    pub async fn get_decisions(&self, machine_id: Option<&str>) -> Result<DecisionStream> {
        let machine_id = match machine_id.or(self.config.primary_machine_id.as_deref()) {
            Some(id) => id.to_string(),
            None => self.first_usable_machine().await?,
        };

        let mut machine = self.get_or_create_machine(&machine_id).await?;
        let token = self.credentials().prepare_machine(&mut machine).await?;

        let response = self
            .transport
            .send(ApiRequest::new(Endpoint::DecisionsStream).bearer(token))
            .await?;
        if !response.is_success() {
            if response.status == 401 {
                self.storage.clear_token(&machine_id).await?;
            }
            return Err(ClientError::Api {
                status: response.status,
                message: response.error_message(),
            });
        }

        let stream: DecisionStream = response.json()?;
        info!(
            machine_id = %machine_id,
            new = stream.new.len(),
            deleted = stream.deleted.len(),
            "Decisions pulled"
        );
        Ok(stream)
    }

    async fn first_usable_machine(&self) -> Result<String> {
        self.storage
            .list_machines(Some(false))
            .await?
            .into_iter()
            .find(|m| !m.receive_bad_requests)
            .map(|m| m.machine_id)
            .ok_or(ClientError::NoUsableMachine)
    }

    /// Enroll machines to a console account. Every machine gets an outcome.
    pub async fn enroll_machines(
        &self,
        machine_ids: &[String],
        name: &str,
        attachment_key: &str,
        tags: &[String],
        overwrite: bool,
    ) -> Result<Vec<EnrollOutcome>> {
        let mut machines = Vec::with_capacity(machine_ids.len());
        for machine_id in machine_ids {
            machines.push(self.get_or_create_machine(machine_id).await?);
        }

        let request = EnrollRequest {
            name: name.to_string(),
            attachment_key: attachment_key.to_string(),
            tags: tags.to_vec(),
            overwrite,
        };
        Enroller {
            storage: &self.storage,
            transport: &self.transport,
            credentials: self.credentials(),
            config: &self.config,
        }
        .enroll(machines, &request)
        .await
    }

    /// Lift quarantine and any registration rejection for a machine.
    pub async fn reset_machine(&self, machine_id: &str) -> Result<Machine> {
        let Some(mut machine) = self.storage.get_machine(machine_id).await? else {
            return Err(StorageError::NotFound(format!("Machine {machine_id}")).into());
        };

        if machine.is_failing || machine.receive_bad_requests {
            warn!(
                machine_id = %machine_id,
                failures = machine.last_failure_count,
                "Resetting machine state"
            );
        }
        machine.is_failing = false;
        machine.last_failure_count = 0;
        machine.receive_bad_requests = false;
        Ok(self.storage.update_or_create_machine(machine).await?)
    }
}
