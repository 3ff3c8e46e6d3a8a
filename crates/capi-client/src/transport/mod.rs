//! Transport contract between the engine and the remote API.
//!
//! The engine builds [`ApiRequest`]s and interprets [`ApiResponse`] status
//! codes itself; a transport only moves bytes. [`HttpTransport`] is the
//! production implementation.

use std::future::Future;

use serde::de::DeserializeOwned;
use thiserror::Error;

mod http;

pub use http::HttpTransport;

/// Remote API endpoints used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Register,
    Login,
    Signals,
    DecisionsStream,
    Enroll,
    Metrics,
}

impl Endpoint {
    /// Path relative to the API root.
    pub const fn path(self) -> &'static str {
        match self {
            Self::Register => "/watchers",
            Self::Login => "/watchers/login",
            Self::Signals => "/signals",
            Self::DecisionsStream => "/decisions/stream",
            Self::Enroll => "/watchers/enroll",
            Self::Metrics => "/metrics",
        }
    }

    pub const fn method(self) -> Method {
        match self {
            Self::DecisionsStream => Method::Get,
            _ => Method::Post,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One call to the remote API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: Endpoint,
    pub body: Option<serde_json::Value>,
    /// Bearer token for authenticated endpoints.
    pub token: Option<String>,
}

impl ApiRequest {
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            body: None,
            token: None,
        }
    }

    #[must_use]
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Raw reply of the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    /// Human-readable reason for a failed call: the API `message` field when
    /// present, the raw body otherwise.
    pub fn error_message(&self) -> String {
        #[derive(serde::Deserialize)]
        struct ErrorBody {
            message: String,
        }

        if let Ok(parsed) = self.json::<ErrorBody>() {
            return parsed.message;
        }
        let body = self.body.trim();
        if body.is_empty() {
            format!("HTTP {}", self.status)
        } else {
            body.chars().take(200).collect()
        }
    }
}

/// Failures reaching the remote API at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Sends requests to the remote API.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, TransportError>> + Send;
}
