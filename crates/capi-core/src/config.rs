//! Client configuration.
//!
//! Values come from built-in defaults, an optional JSON settings file and
//! finally CLI flags / environment variables applied by the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Production API root.
pub const CAPI_BASE_URL: &str = "https://api.crowdsec.net/v3";
/// Staging API root, used unless `prod` is set.
pub const CAPI_BASE_DEV_URL: &str = "https://api.dev.crowdsec.net/v3";

/// Configuration of a `CapiClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scenarios declared by machines at registration and login.
    pub scenarios: Vec<String>,
    /// Select the production endpoint instead of staging.
    pub prod: bool,
    /// Prepended to the `User-Agent` header of every request.
    pub user_agent_prefix: String,
    /// Consecutive failed sends before a machine is quarantined.
    pub max_retries: u32,
    /// Safety margin (seconds) subtracted from token expiry.
    pub latency_offset: i64,
    /// Pause (seconds) before retrying an unauthorized enrollment.
    pub retry_delay: u64,
    /// Signals per request, and rows per prune round.
    pub batch_size: u32,
    /// Machine used for decision pulls when none is given explicitly.
    pub primary_machine_id: Option<String>,
    /// Overrides the endpoint selected by `prod`.
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// Push machine metrics after a successful send cycle.
    pub send_metrics: bool,
    /// Delete delivered signals at the end of every send cycle.
    pub prune_after_send: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scenarios: Vec::new(),
            prod: false,
            user_agent_prefix: String::new(),
            max_retries: 3,
            latency_offset: 10,
            retry_delay: 5,
            batch_size: 250,
            primary_machine_id: None,
            base_url: None,
            request_timeout_secs: 30,
            send_metrics: true,
            prune_after_send: true,
        }
    }
}

impl ClientConfig {
    pub fn new(scenarios: Vec<String>) -> Self {
        Self {
            scenarios,
            ..Self::default()
        }
    }

    /// Load a JSON settings file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.latency_offset < 0 {
            return Err(Error::Config("latency_offset must not be negative".into()));
        }
        if self.scenarios.is_empty() {
            return Err(Error::Config("at least one scenario is required".into()));
        }
        if let Some(bad) = self.scenarios.iter().find(|s| !is_valid_scenario(s)) {
            return Err(Error::Config(format!(
                "scenario '{bad}' is not of the form namespace/name"
            )));
        }
        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!("base_url '{url}' is not an http(s) URL")));
            }
        }
        Ok(())
    }

    /// Root URL of the remote API, without trailing slash.
    pub fn api_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.prod => CAPI_BASE_URL.to_string(),
            None => CAPI_BASE_DEV_URL.to_string(),
        }
    }

    pub fn user_agent(&self) -> String {
        let version = env!("CARGO_PKG_VERSION");
        if self.user_agent_prefix.is_empty() {
            format!("capi-rs/{version}")
        } else {
            format!("{}-capi-rs/{version}", self.user_agent_prefix)
        }
    }

    /// Configured scenarios, sorted and deduplicated.
    pub fn sorted_scenarios(&self) -> Vec<String> {
        let mut scenarios = self.scenarios.clone();
        scenarios.sort();
        scenarios.dedup();
        scenarios
    }
}

fn is_valid_scenario(scenario: &str) -> bool {
    scenario
        .split_once('/')
        .is_some_and(|(ns, name)| !ns.is_empty() && !name.is_empty() && !name.contains('/'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.latency_offset, 10);
        assert_eq!(config.retry_delay, 5);
        assert_eq!(config.batch_size, 250);
        assert!(config.send_metrics);
        assert!(config.prune_after_send);
        assert!(!config.prod);
        assert!(config.scenarios.is_empty());
    }

    #[test]
    fn api_url_follows_prod_flag_and_override() {
        let mut config = ClientConfig::default();
        assert_eq!(config.api_url(), CAPI_BASE_DEV_URL);

        config.prod = true;
        assert_eq!(config.api_url(), CAPI_BASE_URL);

        config.base_url = Some("http://localhost:8080/v3/".into());
        assert_eq!(config.api_url(), "http://localhost:8080/v3");
    }

    #[test]
    fn user_agent_includes_prefix() {
        let mut config = ClientConfig::default();
        assert!(config.user_agent().starts_with("capi-rs/"));

        config.user_agent_prefix = "waf".into();
        assert!(config.user_agent().starts_with("waf-capi-rs/"));
    }

    #[test]
    fn validate_rejects_zero_retries_and_batch() {
        let scenarios = vec!["crowdsecurity/ssh-bf".to_string()];
        let config = ClientConfig {
            max_retries: 0,
            ..ClientConfig::new(scenarios.clone())
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = ClientConfig {
            batch_size: 0,
            ..ClientConfig::new(scenarios)
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let Err(Error::Config(message)) = ClientConfig::default().validate() else {
            panic!("a config without scenarios must be rejected");
        };
        assert!(message.contains("scenario"));
    }

    #[test]
    fn validate_rejects_malformed_scenarios() {
        for bad in ["ssh-bf", "/ssh-bf", "crowdsecurity/", "a/b/c"] {
            let config = ClientConfig::new(vec![bad.into()]);
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
        let config = ClientConfig::new(vec!["crowdsecurity/ssh-bf".into()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sorted_scenarios_dedups() {
        let config = ClientConfig::new(vec![
            "b/two".into(),
            "a/one".into(),
            "b/two".into(),
        ]);
        assert_eq!(config.sorted_scenarios(), vec!["a/one", "b/two"]);
    }

    #[test]
    fn from_file_applies_defaults_for_missing_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capi.json");
        std::fs::write(
            &path,
            r#"{"scenarios": ["crowdsecurity/ssh-bf"], "prod": true, "batch_size": 10}"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert!(config.prod);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.scenarios, vec!["crowdsecurity/ssh-bf"]);
    }

    #[test]
    fn from_file_validates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("capi.json");
        std::fs::write(
            &path,
            r#"{"scenarios": ["crowdsecurity/ssh-bf"], "max_retries": 0}"#,
        )
        .unwrap();
        assert!(matches!(
            ClientConfig::from_file(&path),
            Err(Error::Config(_))
        ));
    }
}
