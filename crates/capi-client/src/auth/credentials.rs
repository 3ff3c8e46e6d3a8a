//! Registration and token refresh for machines.

use capi_core::helpers::parse_timestamp;
use capi_core::{ClientConfig, Machine, Token};
use rand::RngExt;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::claims::token_expiry;
use super::clock::Clock;
use crate::error::{ClientError, Result};
use crate::storage::Storage;
use crate::transport::{ApiRequest, ApiResponse, Endpoint, Transport};

const PASSWORD_LEN: usize = 32;

/// Whether a token expiring at `expires_at` is still usable at `now`, keeping
/// `latency_offset` seconds of margin.
pub const fn token_is_fresh(now: i64, expires_at: i64, latency_offset: i64) -> bool {
    now.saturating_add(latency_offset) < expires_at
}

/// Generate a random alphanumeric registration password.
fn generate_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..PASSWORD_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    expire: Option<String>,
}

/// Keeps machines registered and holding a usable token.
///
/// Every state change is written back to storage before returning.
pub struct CredentialManager<'a, S, T, C> {
    storage: &'a S,
    transport: &'a T,
    clock: &'a C,
    config: &'a ClientConfig,
}

impl<'a, S: Storage, T: Transport, C: Clock> CredentialManager<'a, S, T, C> {
    pub const fn new(
        storage: &'a S,
        transport: &'a T,
        clock: &'a C,
        config: &'a ClientConfig,
    ) -> Self {
        Self {
            storage,
            transport,
            clock,
            config,
        }
    }

    /// Register the machine if needed, then return a usable token.
    pub async fn prepare_machine(&self, machine: &mut Machine) -> Result<String> {
        self.ensure_registered(machine).await?;
        self.get_valid_token(machine).await
    }

    /// Register the machine with the remote API unless it already is.
    ///
    /// A machine whose registration was rejected outright is never retried
    /// automatically.
    pub async fn ensure_registered(&self, machine: &mut Machine) -> Result<()> {
        if machine.receive_bad_requests {
            debug!(machine_id = %machine.machine_id, "Registration previously rejected, skipping");
            return Err(ClientError::BadRequest {
                machine_id: machine.machine_id.clone(),
            });
        }
        if machine.is_registered {
            return Ok(());
        }

        if machine.password.is_empty() {
            machine.password = generate_password();
        }
        if machine.scenarios.is_empty() {
            machine.scenarios = self.config.sorted_scenarios();
        }

        info!(machine_id = %machine.machine_id, "Registering machine");
        let response = self
            .transport
            .send(ApiRequest::new(Endpoint::Register).json(credentials_body(machine)))
            .await?;

        match response.status {
            _ if response.is_success() => {
                machine.is_registered = true;
                self.persist(machine).await?;
                info!(machine_id = %machine.machine_id, "Machine registered");
                Ok(())
            }
            400 | 422 => {
                machine.receive_bad_requests = true;
                self.persist(machine).await?;
                error!(
                    machine_id = %machine.machine_id,
                    status = response.status,
                    reason = %response.error_message(),
                    "Registration rejected, machine will not be registered again automatically"
                );
                Err(ClientError::BadRequest {
                    machine_id: machine.machine_id.clone(),
                })
            }
            401 | 403 => Err(ClientError::Authentication {
                machine_id: machine.machine_id.clone(),
                message: response.error_message(),
            }),
            status => Err(ClientError::Api {
                status,
                message: response.error_message(),
            }),
        }
    }

    /// Return the stored token while it is fresh, logging in otherwise.
    pub async fn get_valid_token(&self, machine: &mut Machine) -> Result<String> {
        if let Some(token) = machine.current_token() {
            if token_is_fresh(self.clock.now(), token.expires_at, self.config.latency_offset) {
                return Ok(token.value);
            }
            debug!(machine_id = %machine.machine_id, expires_at = token.expires_at, "Token expired or about to");
        }

        let token = self.login(machine).await?;
        machine.set_token(&token);
        self.persist(machine).await?;
        Ok(token.value)
    }

    async fn login(&self, machine: &mut Machine) -> Result<Token> {
        if machine.scenarios.is_empty() {
            machine.scenarios = self.config.sorted_scenarios();
        }

        let response = self
            .transport
            .send(ApiRequest::new(Endpoint::Login).json(credentials_body(machine)))
            .await?;

        match response.status {
            _ if response.is_success() => {
                let token = parse_login(&machine.machine_id, &response)?;
                info!(
                    machine_id = %machine.machine_id,
                    expires_at = token.expires_at,
                    "Token refreshed"
                );
                Ok(token)
            }
            401 | 403 => {
                // Credentials are no longer accepted: register again next time.
                machine.is_registered = false;
                self.persist(machine).await?;
                warn!(
                    machine_id = %machine.machine_id,
                    status = response.status,
                    "Login rejected, machine marked for re-registration"
                );
                Err(ClientError::Authentication {
                    machine_id: machine.machine_id.clone(),
                    message: response.error_message(),
                })
            }
            status => Err(ClientError::Api {
                status,
                message: response.error_message(),
            }),
        }
    }

    async fn persist(&self, machine: &mut Machine) -> Result<()> {
        *machine = self
            .storage
            .update_or_create_machine(machine.clone())
            .await?;
        Ok(())
    }
}

fn credentials_body(machine: &Machine) -> serde_json::Value {
    serde_json::json!({
        "machine_id": machine.machine_id,
        "password": machine.password,
        "scenarios": machine.scenarios,
    })
}

fn parse_login(machine_id: &str, response: &ApiResponse) -> Result<Token> {
    let body: LoginResponse = response.json()?;
    let expires_at = token_expiry(&body.token)
        .or_else(|| {
            body.expire
                .as_deref()
                .and_then(|expire| parse_timestamp(expire).ok())
        })
        .ok_or_else(|| ClientError::Api {
            status: response.status,
            message: "login response carries no token expiry".into(),
        })?;

    Ok(Token {
        machine_id: machine_id.to_string(),
        value: body.token,
        expires_at,
    })
}
