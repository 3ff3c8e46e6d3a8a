//! Domain models shared by the storage backends and the client engine.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One reporting security-engine instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub machine_id: String,
    /// Registration secret. Generated at registration time when empty.
    pub password: String,
    /// Current bearer token, if one has been issued.
    pub token: Option<String>,
    /// Expiration of `token` (unix seconds).
    pub token_expires_at: Option<i64>,
    /// Capability tags declared at registration and login.
    pub scenarios: Vec<String>,
    /// Whether the remote API acknowledged a registration for this machine.
    pub is_registered: bool,
    pub is_failing: bool,
    pub last_failure_count: u32,
    /// Set when the remote API rejected the registration outright.
    pub receive_bad_requests: bool,
}

impl Machine {
    pub fn new(machine_id: impl Into<String>, scenarios: Vec<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            scenarios,
            ..Self::default()
        }
    }

    /// The stored token as a [`Token`], when both value and expiry are known.
    pub fn current_token(&self) -> Option<Token> {
        match (&self.token, self.token_expires_at) {
            (Some(value), Some(expires_at)) => Some(Token {
                machine_id: self.machine_id.clone(),
                value: value.clone(),
                expires_at,
            }),
            _ => None,
        }
    }

    /// Replace the stored token wholesale.
    pub fn set_token(&mut self, token: &Token) {
        self.token = Some(token.value.clone());
        self.token_expires_at = Some(token.expires_at);
    }
}

/// Short-lived bearer credential issued by the login endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub machine_id: String,
    pub value: String,
    /// Absolute expiry (unix seconds).
    pub expires_at: i64,
}

/// Origin of a signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub as_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Source {
    /// A source identified by a single IP address.
    pub fn ip(address: impl Into<String>) -> Self {
        Self {
            scope: Some("ip".into()),
            value: Some(address.into()),
            ..Self::default()
        }
    }
}

/// Key/value annotation attached to a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub key: String,
    pub value: String,
}

/// A block/allow directive, either attached to a signal or pulled from the
/// decision stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

/// Body of the decision-stream endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionStream {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub new: Vec<Decision>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub deleted: Vec<Decision>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One reportable security event queued for delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Local storage key; `None` until the signal has been stored.
    pub id: Option<i64>,
    pub machine_id: String,
    pub uuid: String,
    /// Dotted category, `namespace/name`.
    pub scenario: String,
    pub scenario_hash: String,
    pub scenario_version: String,
    pub scenario_trust: String,
    pub message: String,
    /// Creation time (unix seconds). Batches are composed oldest first.
    pub created_at: i64,
    pub start_at: Option<i64>,
    pub stop_at: Option<i64>,
    pub source: Option<Source>,
    pub context: Vec<Context>,
    pub decisions: Vec<Decision>,
    pub sent: bool,
    pub alert_id: Option<i64>,
}

/// Wire representation of a signal in a batch submission.
#[derive(Debug, Serialize)]
pub struct SignalPayload<'a> {
    pub machine_id: &'a str,
    pub uuid: &'a str,
    pub scenario: &'a str,
    pub scenario_hash: &'a str,
    pub scenario_version: &'a str,
    pub scenario_trust: &'a str,
    pub message: &'a str,
    pub created_at: String,
    pub start_at: String,
    pub stop_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'a Source>,
    pub context: &'a [Context],
    pub decisions: &'a [Decision],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
}

impl Signal {
    pub fn to_payload(&self) -> SignalPayload<'_> {
        SignalPayload {
            machine_id: &self.machine_id,
            uuid: &self.uuid,
            scenario: &self.scenario,
            scenario_hash: &self.scenario_hash,
            scenario_version: &self.scenario_version,
            scenario_trust: &self.scenario_trust,
            message: &self.message,
            created_at: format_timestamp(self.created_at),
            start_at: format_timestamp(self.start_at.unwrap_or(self.created_at)),
            stop_at: format_timestamp(self.stop_at.unwrap_or(self.created_at)),
            source: self.source.as_ref(),
            context: &self.context,
            decisions: &self.decisions,
            alert_id: self.alert_id,
        }
    }
}

/// Render unix seconds as an RFC 3339 UTC timestamp.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
