//! Shared test helpers: temp-database app state, request helpers and a
//! local webhook receiver that records every trigger it gets.

#![allow(dead_code)]

pub mod log_capture;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    routing::post,
    Json, Router,
};
use http_body_util::BodyExt;
use polyradar_api::{build_router, AppState};
use polyradar_common::config::{ModelWebhook, TomlConfig};
use polyradar_common::db::init_database;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;
use uuid::Uuid;

/// Nothing listens here, so triggers fail fast with "connection refused"
pub const UNREACHABLE_HOOKS: &str = "http://127.0.0.1:9/hooks";

pub const EVENT_URL: &str =
    "https://polymarket.com/event/what-will-be-the-top-global-netflix-movie-this-week-638";

/// Config with two models whose hooks live under `hook_base`
pub fn test_config(hook_base: &str) -> TomlConfig {
    let mut config = TomlConfig::default();
    config.server.public_base_url = "http://radar.test".to_string();
    config.webhooks.models = ["model1", "model2"]
        .iter()
        .map(|name| ModelWebhook {
            name: name.to_string(),
            url: format!("{}/{}", hook_base, name),
        })
        .collect();
    config.webhooks.timeline_url = format!("{}/timeline", hook_base);
    config.webhooks.insights_url = format!("{}/insights", hook_base);
    config.webhooks.request_timeout_secs = 2;
    config
}

pub struct TestApp {
    _dir: TempDir,
    pub state: AppState,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config(UNREACHABLE_HOOKS)).await
    }

    pub async fn with_config(config: TomlConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = init_database(&dir.path().join("test.db")).await.unwrap();
        let state = AppState::new(db, config).unwrap();
        Self { _dir: dir, state }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(self.router(), request).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_with_headers(uri, body, &[]).await
    }

    pub async fn post_with_headers(
        &self,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        send(self.router(), request).await
    }

    pub async fn post_raw(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(self.router(), request).await
    }

    /// Create an anonymous analysis through the API and return its id
    pub async fn create_analysis(&self) -> Uuid {
        let (status, body) = self
            .post_json("/api/analyze", serde_json::json!({ "event_url": EVENT_URL }))
            .await;
        assert_eq!(status, StatusCode::OK, "analyze failed: {}", body);
        body["analysis_id"].as_str().unwrap().parse().unwrap()
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

/// One trigger captured by [`MockReceiver`]
#[derive(Debug, Clone)]
pub struct RecordedTrigger {
    pub hook: String,
    pub body: Value,
    pub secret: Option<String>,
}

/// Local stand-in for the automation webhooks
///
/// Records every POST to `/hooks/:name`. Hooks whose name starts with
/// `fail` answer 500.
pub struct MockReceiver {
    pub addr: SocketAddr,
    recorded: Arc<Mutex<Vec<RecordedTrigger>>>,
}

impl MockReceiver {
    pub async fn start() -> Self {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/hooks/:name", post(record_trigger))
            .with_state(Arc::clone(&recorded));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, recorded }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/hooks", self.addr)
    }

    pub fn triggers(&self) -> Vec<RecordedTrigger> {
        self.recorded.lock().unwrap().clone()
    }

    /// Wait until at least `count` triggers arrived (or give up after 5 s)
    pub async fn wait_for(&self, count: usize) -> Vec<RecordedTrigger> {
        for _ in 0..100 {
            let triggers = self.triggers();
            if triggers.len() >= count {
                return triggers;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.triggers()
    }
}

async fn record_trigger(
    State(recorded): State<Arc<Mutex<Vec<RecordedTrigger>>>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let secret = headers
        .get("x-webhook-secret")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let failing = name.starts_with("fail");

    recorded.lock().unwrap().push(RecordedTrigger {
        hook: name,
        body,
        secret,
    });

    if failing {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}
