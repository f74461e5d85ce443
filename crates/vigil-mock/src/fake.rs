//! In-process stand-in for the mock backend.
//!
//! Serves the same node and image endpoints as the real mock on an ephemeral
//! localhost port, keeps its tables in memory and records every request. Tests
//! play the part of the service under test by mutating [`FakeState`] directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::image::Image;

/// Flavor the fake assigns for a given memory size.
#[must_use]
pub fn flavor_for_memory(memory_mb: i64) -> &'static str {
    match memory_mb {
        32_768 => "onmetal-compute1",
        524_288 => "onmetal-memory1",
        _ => "onmetal-io1",
    }
}

/// One node as the fake stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeNode {
    /// Node id.
    pub uuid: String,
    /// Cached image id.
    pub cache_image_id: Option<String>,
    /// Instance lease.
    pub instance_uuid: Option<String>,
    /// Flavor tag.
    pub flavor: String,
    /// Memory size.
    pub memory_mb: i64,
    /// Provisioning state.
    pub provision_state: String,
}

impl FakeNode {
    fn to_wire(&self) -> Value {
        json!({
            "uuid": self.uuid,
            "driver_info": {"cache_image_id": self.cache_image_id},
            "instance_uuid": self.instance_uuid,
            "extra": {"flavor": self.flavor},
            "properties": {"memory_mb": self.memory_mb},
            "provision_state": self.provision_state,
        })
    }
}

/// A request the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
}

/// Tables behind the fake.
#[derive(Debug, Default)]
pub struct FakeState {
    nodes: Vec<FakeNode>,
    images: Vec<Image>,
    requests: Vec<RecordedRequest>,
    fail_next: Option<StatusCode>,
}

impl FakeState {
    /// Adds an unprovisioned, uncached node and returns its id.
    pub fn add_node(&mut self, flavor: &str) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        self.nodes.push(FakeNode {
            uuid: uuid.clone(),
            cache_image_id: None,
            instance_uuid: None,
            flavor: flavor.to_string(),
            memory_mb: 131_072,
            provision_state: "available".to_string(),
        });
        uuid
    }

    /// Adds an image and returns its id.
    pub fn add_image(&mut self, name: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.images.push(Image::new(id.clone(), name));
        id
    }

    /// Caches `image_id` on a node. Returns false for an unknown node.
    pub fn cache(&mut self, node_id: &str, image_id: &str) -> bool {
        match self.node_mut(node_id) {
            Some(node) => {
                node.cache_image_id = Some(image_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Removes the cached image from a node.
    pub fn eject(&mut self, node_id: &str) -> bool {
        match self.node_mut(node_id) {
            Some(node) => {
                node.cache_image_id = None;
                true
            }
            None => false,
        }
    }

    /// Caches `image_id` on up to `count` uncached, unprovisioned nodes.
    /// Returns how many were cached.
    pub fn cache_uncached(&mut self, count: usize, image_id: &str) -> usize {
        let mut cached = 0;
        for node in self
            .nodes
            .iter_mut()
            .filter(|n| n.cache_image_id.is_none() && n.instance_uuid.is_none())
            .take(count)
        {
            node.cache_image_id = Some(image_id.to_string());
            cached += 1;
        }
        cached
    }

    /// Gives a node an instance lease.
    pub fn provision(&mut self, node_id: &str) -> bool {
        self.apply_provision_state(node_id, "active")
    }

    /// Nodes, in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[FakeNode] {
        &self.nodes
    }

    /// Images, in creation order.
    #[must_use]
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// Number of nodes with a cached image.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.cache_image_id.is_some()).count()
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    /// Answers the next request with `status` instead of handling it.
    pub fn fail_next(&mut self, status: StatusCode) {
        self.fail_next = Some(status);
    }

    fn node_mut(&mut self, node_id: &str) -> Option<&mut FakeNode> {
        self.nodes.iter_mut().find(|n| n.uuid == node_id)
    }

    fn apply_provision_state(&mut self, node_id: &str, target: &str) -> bool {
        let Some(node) = self.node_mut(node_id) else {
            return false;
        };
        match target {
            "active" => {
                node.instance_uuid = Some(uuid::Uuid::new_v4().to_string());
                node.provision_state = "active".to_string();
            }
            "deleted" => {
                node.instance_uuid = None;
                node.provision_state = "available".to_string();
            }
            other => node.provision_state = other.to_string(),
        }
        true
    }

    /// Records the request and returns an injected failure, if one is pending.
    fn record(&mut self, method: &Method, path: String) -> Option<StatusCode> {
        self.requests.push(RecordedRequest {
            method: method.to_string(),
            path,
        });
        self.fail_next.take()
    }
}

type Shared = Arc<Mutex<FakeState>>;

/// A running fake backend. Stops serving when dropped.
#[derive(Debug)]
pub struct FakeBackend {
    addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl FakeBackend {
    /// Starts the fake on an ephemeral localhost port.
    pub async fn start() -> std::io::Result<Self> {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let app = router(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "fake backend stopped");
            }
        });

        tracing::debug!(%addr, "fake backend listening");
        Ok(Self {
            addr,
            state,
            server,
        })
    }

    /// Base URL to hand to a [`MockClient`](crate::MockClient).
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Port the fake listens on.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Runs `f` with the tables locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Shared handle to the tables, for tasks that mutate them later.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        Arc::clone(&self.state)
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/ironic/v1/nodes", post(create_node))
        .route("/ironic/v1/nodes/detail", get(list_nodes))
        .route("/ironic/v1/nodes/{id}", delete(delete_node))
        .route(
            "/ironic/v1/nodes/{id}/states/provision",
            put(set_provision_state),
        )
        .route("/glance/v2/images", get(list_images).post(create_image))
        .route("/glance/v2/images/{id}", delete(delete_image))
        .with_state(state)
}

async fn list_nodes(State(state): State<Shared>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::GET, "/ironic/v1/nodes/detail".to_string()) {
        return status.into_response();
    }
    let nodes: Vec<Value> = state.nodes.iter().map(FakeNode::to_wire).collect();
    Json(json!({ "nodes": nodes })).into_response()
}

async fn create_node(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::POST, "/ironic/v1/nodes".to_string()) {
        return status.into_response();
    }
    let memory_mb = body["properties"]["memory_mb"].as_i64().unwrap_or(131_072);
    let id = state.add_node(flavor_for_memory(memory_mb));
    let Some(node) = state.node_mut(&id) else {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    node.memory_mb = memory_mb;
    (StatusCode::CREATED, Json(node.to_wire())).into_response()
}

async fn delete_node(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::DELETE, format!("/ironic/v1/nodes/{id}")) {
        return status.into_response();
    }
    let before = state.nodes.len();
    state.nodes.retain(|n| n.uuid != id);
    if state.nodes.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn set_provision_state(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock();
    let path = format!("/ironic/v1/nodes/{id}/states/provision");
    if let Some(status) = state.record(&Method::PUT, path) {
        return status.into_response();
    }
    let Some(target) = body["target"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if state.apply_provision_state(&id, target) {
        StatusCode::ACCEPTED.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn list_images(State(state): State<Shared>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::GET, "/glance/v2/images".to_string()) {
        return status.into_response();
    }
    Json(json!({ "images": state.images })).into_response()
}

async fn create_image(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::POST, "/glance/v2/images".to_string()) {
        return status.into_response();
    }
    let Some(name) = body["name"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let id = body["id"]
        .as_str()
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
    let image = Image::new(id, name);
    state.images.push(image.clone());
    (StatusCode::CREATED, Json(image)).into_response()
}

async fn delete_image(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock();
    if let Some(status) = state.record(&Method::DELETE, format!("/glance/v2/images/{id}")) {
        return status.into_response();
    }
    let before = state.images.len();
    state.images.retain(|image| image.id != id);
    if state.images.len() == before {
        StatusCode::NOT_FOUND.into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}
