//! reqwest-backed transport.

use std::time::Duration;

use capi_core::ClientConfig;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use tracing::debug;

use super::{ApiRequest, ApiResponse, Method, Transport, TransportError};

/// Talks to the remote API over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for the endpoint and identity described by `config`.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // reqwest is built with rustls-no-provider; Err means one is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.api_url(),
        })
    }

    pub(crate) fn url(&self, request: &ApiRequest) -> String {
        format!("{}{}", self.base_url, request.endpoint.path())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url(&request);
        let mut builder = match request.endpoint.method() {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;

        debug!(url = %url, status, "API call completed");
        Ok(ApiResponse { status, body })
    }
}
