//! Test doubles shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use jsonwebtoken::{EncodingKey, Header};

use crate::auth::TokenClaims;
use crate::transport::{ApiRequest, ApiResponse, Endpoint, Transport, TransportError};

type Reply = Result<ApiResponse, TransportError>;

/// Transport answering from per-endpoint scripts.
///
/// Queued replies are consumed first; once a queue is empty the endpoint's
/// fallback (if any) answers every further call.
#[derive(Default)]
pub struct MockTransport {
    queued: Mutex<HashMap<Endpoint, VecDeque<Reply>>>,
    fallback: Mutex<HashMap<Endpoint, Reply>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that accepts registration, hands out tokens valid until `exp`,
    /// and acknowledges every signal, metrics and enrollment call.
    pub fn accepting(exp: i64) -> Self {
        let mock = Self::new();
        mock.always(Endpoint::Register, Ok(ApiResponse::new(201, "")));
        mock.always(Endpoint::Login, Ok(login_reply(exp)));
        mock.always(Endpoint::Signals, Ok(ApiResponse::new(200, "\"OK\"")));
        mock.always(Endpoint::Metrics, Ok(ApiResponse::new(201, "")));
        mock.always(Endpoint::Enroll, Ok(ApiResponse::new(200, "")));
        mock
    }

    pub fn push(&self, endpoint: Endpoint, reply: Reply) {
        self.queued
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    pub fn always(&self, endpoint: Endpoint, reply: Reply) {
        self.fallback.lock().unwrap().insert(endpoint, reply);
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }

    /// Machine ids of every signal posted so far.
    pub fn sent_machine_ids(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter(|r| r.endpoint == Endpoint::Signals)
            .filter_map(|r| r.body.as_ref()?.as_array().cloned())
            .flatten()
            .filter_map(|s| s["machine_id"].as_str().map(str::to_string))
            .collect()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let endpoint = request.endpoint;
        self.requests.lock().unwrap().push(request);

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(&endpoint)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::InvalidRequest(format!(
                    "no scripted reply for {endpoint:?}"
                )))
            })
    }
}

/// A signed JWT expiring at `exp`.
pub fn mint_token(exp: i64) -> String {
    let claims = TokenClaims {
        exp,
        id: None,
        orig_iat: None,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"remote-api-secret"),
    )
    .unwrap()
}

/// Successful login body carrying a token that expires at `exp`.
pub fn login_reply(exp: i64) -> ApiResponse {
    let body = serde_json::json!({
        "code": 200,
        "expire": capi_core::models::format_timestamp(exp),
        "token": mint_token(exp),
    });
    ApiResponse::new(200, body.to_string())
}

pub fn status(code: u16) -> Reply {
    Ok(ApiResponse::new(code, ""))
}

pub fn network_down() -> Reply {
    Err(TransportError::Http("connection refused".into()))
}
