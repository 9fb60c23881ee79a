#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use reqwest::Client;
use serde_json::{Value, json};
use tempfile::TempDir;

use exportq::archive::Archive;
use exportq::config::Config;
use exportq::delivery::HttpTransport;
use exportq::retention::RetentionPolicy;
use exportq::retry::RetryPolicy;
use exportq::store::Store;
use exportq::worker::{Worker, WorkerSettings};

/// A file-backed store in its own temporary directory.
pub struct TestQueue {
    pub store: Arc<Store>,
    pub dir: TempDir,
}

impl TestQueue {
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("queue.db")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.path().join("failed_exports")
    }

    /// Write a bundle file and return its path as a bundle reference.
    pub fn write_bundle(&self, name: &str, contents: &Value) -> String {
        let bundles = self.dir.path().join("bundles");
        std::fs::create_dir_all(&bundles).unwrap();
        let path = bundles.join(name);
        std::fs::write(&path, serde_json::to_vec(contents).unwrap()).unwrap();
        path.to_string_lossy().to_string()
    }

    /// Close the store and open a fresh one on the same database, as a
    /// restarted process would.
    pub async fn reopen(self) -> TestQueue {
        self.store.close().await;
        let store = Store::open(
            &self.db_path(),
            RetryPolicy::default(),
            Archive::new(self.archive_dir()),
        )
        .await
        .expect("reopen store");
        TestQueue {
            store: Arc::new(store),
            dir: self.dir,
        }
    }
}

pub async fn open_queue() -> TestQueue {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(
        &dir.path().join("queue.db"),
        RetryPolicy::default(),
        Archive::new(dir.path().join("failed_exports")),
    )
    .await
    .expect("open store");
    TestQueue {
        store: Arc::new(store),
        dir,
    }
}

pub fn sample_bundle() -> Value {
    json!({
        "installation_id": "boat-0001",
        "export_version": "2.0",
        "data": { "engine_benchmark": [], "boatlog": [] }
    })
}

/// Set a timestamp column of one entry to `days_ago` days before now.
pub async fn backdate(store: &Store, id: uuid::Uuid, column: &str, days_ago: i64) {
    let ms = (chrono::Utc::now() - chrono::Duration::days(days_ago)).timestamp_millis();
    sqlx::query(&format!("UPDATE queue_entries SET {column} = ?1 WHERE id = ?2"))
        .bind(ms)
        .bind(id.to_string())
        .execute(store.pool())
        .await
        .expect("backdate");
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
struct MockState {
    script: Arc<Mutex<VecDeque<(u16, String)>>>,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

/// Stand-in for the remote receiving endpoint. Answers scripted statuses in
/// order, then 200 once the script runs out.
pub struct MockEndpoint {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockEndpoint {
    pub async fn start() -> MockEndpoint {
        let state = MockState::default();

        let app = Router::new()
            .route("/api/v1/data/import", post(import))
            .route("/ping", get(|| async { "pong" }))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock endpoint");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock endpoint failed");
        });

        MockEndpoint { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/api/v1/data/import", self.addr)
    }

    pub fn probe_url(&self) -> String {
        format!("http://{}/ping", self.addr)
    }

    pub fn respond_with(&self, status: u16, body: &str) {
        self.state
            .script
            .lock()
            .unwrap()
            .push_back((status, body.to_string()));
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn import(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state.received.lock().unwrap().push(ReceivedRequest {
        authorization: header("authorization"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });

    let (status, body) = state
        .script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or((200, "{\"success\":true}".to_string()));

    (StatusCode::from_u16(status).unwrap(), body)
}

pub fn test_settings() -> WorkerSettings {
    WorkerSettings {
        poll_interval: Duration::from_millis(50),
        delivery_timeout: Duration::from_secs(5),
        error_backoff: Duration::from_millis(100),
        default_token: "fallback-token".to_string(),
    }
}

pub fn http_worker(queue: &TestQueue, endpoint: &MockEndpoint) -> Worker {
    let transport = HttpTransport::new(endpoint.url(), Duration::from_secs(5), None)
        .expect("build transport");
    Worker::new(queue.store.clone(), Arc::new(transport), test_settings())
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// A running HTTP front-end over a temporary queue.
pub struct TestApp {
    pub addr: SocketAddr,
    pub queue: TestQueue,
    pub client: Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get_json(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (Value, StatusCode) {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("post request failed");
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn enqueue(&self, bundle_ref: &str) -> String {
        let (body, status) = self
            .post_json(
                "/api/v1/queue",
                &json!({ "bundle_ref": bundle_ref, "tier": 2, "category_count": 9 }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "enqueue failed: {body}");
        body["id"].as_str().unwrap().to_string()
    }
}

pub fn test_config(queue: &TestQueue) -> Config {
    Config {
        database_path: queue.db_path(),
        archive_dir: queue.archive_dir(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0, // unused, we bind to random port
        endpoint_url: "http://127.0.0.1:9/api/v1/data/import".to_string(),
        auth_token: "unknown".to_string(),
        probe_url: None,
        poll_interval: Duration::from_millis(50),
        delivery_timeout: Duration::from_secs(5),
        error_backoff: Duration::from_millis(100),
        retry: RetryPolicy::default(),
        retention: RetentionPolicy::default(),
        cleanup_interval: None,
        log_level: "warn".to_string(),
    }
}

/// Spawn the HTTP front-end without a worker, so queue state only changes
/// through the API under test.
pub async fn spawn_app() -> TestApp {
    let queue = open_queue().await;
    let config = test_config(&queue);
    let (app, _state) = exportq::build_app(queue.store.clone(), config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        queue,
        client: Client::new(),
    }
}
