//! Common test utilities for E2E tests
//!
//! Serves an in-memory fake of the remote collection API with axum and
//! builds a full [`AppState`] pointed at it.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::get,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use teasync::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

pub const TEST_TOKEN: &str = "test-token";

/// One request seen by the fake remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorized: bool,
}

/// Mutable state of the fake remote
#[derive(Debug)]
pub struct RemoteState {
    /// resource -> id -> entity
    pub collections: HashMap<String, BTreeMap<String, Value>>,
    pub requests: Vec<RecordedRequest>,
    /// When set, every collection request fails with this status
    pub fail_with: Option<StatusCode>,
    pub healthy: bool,
}

impl Default for RemoteState {
    fn default() -> Self {
        Self {
            collections: HashMap::new(),
            requests: Vec::new(),
            fail_with: None,
            healthy: true,
        }
    }
}

type SharedRemote = Arc<Mutex<RemoteState>>;

/// Fake remote API instance
pub struct FakeRemote {
    pub addr: String,
    pub state: SharedRemote,
}

impl FakeRemote {
    /// Start a fake remote on an ephemeral port
    pub async fn start() -> Self {
        let state: SharedRemote = Arc::new(Mutex::new(RemoteState::default()));

        let app = Router::new()
            .route("/health", get(health))
            .route("/:resource", get(list_entities).post(create_entity))
            .route(
                "/:resource/:id",
                axum::routing::put(update_entity).delete(delete_entity),
            )
            .with_state(state.clone());

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn set_failure(&self, status: Option<StatusCode>) {
        self.state.lock().unwrap().fail_with = status;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    pub fn insert(&self, resource: &str, entity: Value) {
        let id = entity["id"].as_str().unwrap().to_string();
        self.state
            .lock()
            .unwrap()
            .collections
            .entry(resource.to_string())
            .or_default()
            .insert(id, entity);
    }

    pub fn entity(&self, resource: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .collections
            .get(resource)
            .and_then(|entities| entities.get(id))
            .cloned()
    }

    /// Collection requests seen so far, excluding health checks
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|request| request.path != "/health")
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

fn record(state: &SharedRemote, headers: &HeaderMap, method: &str, path: String) -> Option<StatusCode> {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {}", TEST_TOKEN));

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest {
        method: method.to_string(),
        path,
        authorized,
    });
    state.fail_with
}

async fn health(State(state): State<SharedRemote>, headers: HeaderMap) -> StatusCode {
    record(&state, &headers, "GET", "/health".to_string());
    if state.lock().unwrap().healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn list_entities(
    State(state): State<SharedRemote>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Value>>, StatusCode> {
    if let Some(status) = record(&state, &headers, "GET", format!("/{}", resource)) {
        return Err(status);
    }

    let state = state.lock().unwrap();
    let entities = state
        .collections
        .get(&resource)
        .map(|entities| entities.values().cloned().collect())
        .unwrap_or_default();
    Ok(Json(entities))
}

async fn create_entity(
    State(state): State<SharedRemote>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Some(status) = record(&state, &headers, "POST", format!("/{}", resource)) {
        return status;
    }

    let Some(id) = body["id"].as_str().map(str::to_string) else {
        return StatusCode::UNPROCESSABLE_ENTITY;
    };
    state
        .lock()
        .unwrap()
        .collections
        .entry(resource)
        .or_default()
        .insert(id, body);
    StatusCode::CREATED
}

async fn update_entity(
    State(state): State<SharedRemote>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Some(status) = record(&state, &headers, "PUT", format!("/{}/{}", resource, id)) {
        return status;
    }

    state
        .lock()
        .unwrap()
        .collections
        .entry(resource)
        .or_default()
        .insert(id, body);
    StatusCode::OK
}

async fn delete_entity(
    State(state): State<SharedRemote>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if let Some(status) = record(&state, &headers, "DELETE", format!("/{}/{}", resource, id)) {
        return status;
    }

    if let Some(entities) = state.lock().unwrap().collections.get_mut(&resource) {
        entities.remove(&id);
    }
    StatusCode::NO_CONTENT
}

/// Application wired to a fake remote
pub struct TestApp {
    pub remote: FakeRemote,
    pub state: AppState,
    pub _temp_dir: TempDir,
}

impl TestApp {
    /// Create a new test app with a short retry delay
    pub async fn new() -> Self {
        Self::with_retry_delay_ms(10).await
    }

    pub async fn with_retry_delay_ms(retry_delay_ms: u64) -> Self {
        let remote = FakeRemote::start().await;

        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            database: config::DatabaseConfig { path: db_path },
            remote: config::RemoteConfig {
                base_url: remote.addr.clone(),
                timeout_seconds: 5,
                auth_token: Some(TEST_TOKEN.to_string()),
            },
            sync: config::SyncSettings {
                max_retries: 3,
                retry_delay_ms,
                auto_sync_interval_seconds: 0,
                pull_on_reconnect: true,
            },
            connectivity: config::ConnectivityConfig {
                probe_path: "/health".to_string(),
                probe_interval_seconds: 1,
            },
            cache: config::CacheConfig {
                default_ttl_seconds: Some(60),
                media_ttl_seconds: 604_800,
                sweep_interval_seconds: 3600,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();
        // The monitor starts offline; these tests drive cycles directly
        state.sync.set_online(true);

        Self {
            remote,
            state,
            _temp_dir: temp_dir,
        }
    }
}
