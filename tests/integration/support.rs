//! Scripted transport, sleeper and workspace helpers shared by the tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use airtable_backup::client::{
    ApiRequest, ApiResponse, RateLimitedClient, RetryPolicy, Sleeper, Transport, TransportError,
};
use airtable_backup::fetcher::AirtableSource;
use serde_json::Value;

pub const API_ROOT: &str = "https://api.test/v0";
pub const META_ROOT: &str = "https://api.test/v0/meta";

/// Transport answering from per-path response queues.
///
/// The last response queued for a path is repeated once the queue runs dry.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
    bearers: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, response: ApiResponse) {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn respond_json(&self, path: &str, body: Value) {
        self.respond(path, ApiResponse::ok(body.to_string()));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == path)
            .collect()
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.bearers.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.bearers
            .lock()
            .unwrap()
            .push(bearer.map(str::to_string));

        let mut routes = self.routes.lock().unwrap();
        let Some(queue) = routes.get_mut(request.url.path()) else {
            return Ok(ApiResponse::status(404));
        };
        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(response.unwrap_or_else(|| ApiResponse::status(404)))
    }
}

/// Sleeper that returns immediately and remembers every requested delay
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Client without request spacing and with deterministic backoff
pub fn client(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> RateLimitedClient {
    RateLimitedClient::new(
        transport,
        sleeper,
        Duration::ZERO,
        RetryPolicy::default().without_jitter(),
    )
}

pub fn source(transport: Arc<ScriptedTransport>, sleeper: Arc<RecordingSleeper>) -> AirtableSource {
    AirtableSource::new(client(transport, sleeper).with_token("pat-test"), API_ROOT, META_ROOT)
        .unwrap()
}

/// Airtable-shaped record JSON
pub fn record(id: &str, fields: Value) -> Value {
    serde_json::json!({
        "id": id,
        "createdTime": "2024-01-01T00:00:00.000Z",
        "fields": fields,
    })
}
