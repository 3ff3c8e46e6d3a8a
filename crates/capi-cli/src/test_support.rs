//! In-process API double for command tests.

use std::sync::Mutex;

use capi_client::auth::ManualClock;
use capi_client::{
    ApiRequest, ApiResponse, CapiClient, Endpoint, MemoryStorage, Transport, TransportError,
};
use capi_core::ClientConfig;

pub const NOW: i64 = 1_700_000_000;

pub type TestClient = CapiClient<MemoryStorage, FakeApi, ManualClock>;

/// Accepts everything except enrollments, which answer `enroll_status`.
pub struct FakeApi {
    pub enroll_status: u16,
    pub decisions: String,
    pub log: Mutex<Vec<ApiRequest>>,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            enroll_status: 200,
            decisions: r#"{"new": [], "deleted": null}"#.into(),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl FakeApi {
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .count()
    }
}

impl Transport for FakeApi {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let endpoint = request.endpoint;
        self.log.lock().unwrap().push(request);

        Ok(match endpoint {
            Endpoint::Login => ApiResponse::new(
                200,
                r#"{"token": "opaque", "expire": "2099-01-01T00:00:00Z"}"#,
            ),
            Endpoint::Enroll => ApiResponse::new(self.enroll_status, r#"{"message": "nope"}"#),
            Endpoint::DecisionsStream => ApiResponse::new(200, self.decisions.clone()),
            _ => ApiResponse::new(200, "{}"),
        })
    }
}

pub fn client(api: FakeApi) -> TestClient {
    let config = ClientConfig {
        retry_delay: 0,
        max_retries: 1,
        prune_after_send: false,
        ..ClientConfig::new(vec!["crowdsecurity/ssh-bf".into()])
    };
    CapiClient::new(MemoryStorage::new(), api, ManualClock::new(NOW), config).unwrap()
}

pub fn output(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf).into_owned()
}
