//! Console enrollment of machines.

use std::time::Duration;

use capi_core::{ClientConfig, Machine};
use tracing::{error, info, warn};

use crate::auth::{Clock, CredentialManager};
use crate::error::{ClientError, Result};
use crate::storage::{Storage, StorageError};
use crate::transport::{ApiRequest, Endpoint, Transport};

/// Parameters of an enrollment call, shared by every machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollRequest {
    pub name: String,
    pub attachment_key: String,
    pub tags: Vec<String>,
    pub overwrite: bool,
}

impl EnrollRequest {
    fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "attachment_key": self.attachment_key,
            "tags": self.tags,
            "overwrite": self.overwrite,
        })
    }
}

/// Result of enrolling one machine.
#[derive(Debug)]
pub struct EnrollOutcome {
    pub machine_id: String,
    pub result: std::result::Result<(), ClientError>,
}

impl EnrollOutcome {
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

pub(crate) struct Enroller<'a, S, T, C> {
    pub storage: &'a S,
    pub transport: &'a T,
    pub credentials: CredentialManager<'a, S, T, C>,
    pub config: &'a ClientConfig,
}

impl<S: Storage, T: Transport, C: Clock> Enroller<'_, S, T, C> {
    /// Enroll each machine in turn. Per-machine failures end up in the
    /// outcomes; storage errors abort.
    pub async fn enroll(
        &self,
        machines: Vec<Machine>,
        request: &EnrollRequest,
    ) -> Result<Vec<EnrollOutcome>> {
        let mut outcomes = Vec::with_capacity(machines.len());

        for mut machine in machines {
            let result = match self.enroll_one(&mut machine, request).await {
                Err(ClientError::Storage(e)) => return Err(ClientError::Storage(e)),
                other => other,
            };
            match &result {
                Ok(()) => info!(machine_id = %machine.machine_id, name = %request.name, "Machine enrolled"),
                Err(e) => error!(machine_id = %machine.machine_id, error = %e, "Enrollment failed"),
            }
            outcomes.push(EnrollOutcome {
                machine_id: machine.machine_id,
                result,
            });
        }

        Ok(outcomes)
    }

    async fn enroll_one(&self, machine: &mut Machine, request: &EnrollRequest) -> Result<()> {
        let mut retries = 0;
        loop {
            let token = self.credentials.prepare_machine(machine).await?;
            let response = self
                .transport
                .send(
                    ApiRequest::new(Endpoint::Enroll)
                        .json(request.body())
                        .bearer(token),
                )
                .await?;

            if response.is_success() {
                return Ok(());
            }
            if response.status != 401 || retries >= self.config.max_retries {
                return Err(ClientError::Api {
                    status: response.status,
                    message: response.error_message(),
                });
            }

            retries += 1;
            warn!(
                machine_id = %machine.machine_id,
                attempt = retries,
                "Enrollment unauthorized, refreshing token and retrying"
            );
            self.invalidate_token(machine).await?;
            tokio::time::sleep(Duration::from_secs(self.config.retry_delay)).await;
        }
    }

    async fn invalidate_token(&self, machine: &mut Machine) -> std::result::Result<(), StorageError> {
        machine.token = None;
        machine.token_expires_at = None;
        self.storage.clear_token(&machine.machine_id).await
    }
}
