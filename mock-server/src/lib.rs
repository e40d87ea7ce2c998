//! HTTP peer for exercising request operations end to end.
//!
//! Serves a small resource store plus fixed fixtures: an empty 200, a body
//! of arbitrary size, an echo, and a route that never answers in time.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// How long `/stall` waits before answering.
pub const STALL: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateResource {
    pub name: String,
}

pub type Db = Arc<RwLock<HashMap<Uuid, Resource>>>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/resources", get(list_resources).post(create_resource))
        .route("/resources/{id}", get(get_resource).delete(delete_resource))
        .route("/empty", get(empty))
        .route("/blob/{size}", get(blob))
        .route("/echo", post(echo))
        .route("/stall", get(stall))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn list_resources(State(db): State<Db>) -> Json<Vec<Resource>> {
    let resources = db.read().await;
    Json(resources.values().cloned().collect())
}

async fn create_resource(
    State(db): State<Db>,
    Json(input): Json<CreateResource>,
) -> (StatusCode, Json<Resource>) {
    let resource = Resource {
        id: Uuid::new_v4(),
        name: input.name,
    };
    db.write().await.insert(resource.id, resource.clone());
    tracing::debug!(id = %resource.id, "resource created");
    (StatusCode::CREATED, Json(resource))
}

async fn get_resource(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<Json<Resource>, StatusCode> {
    let resources = db.read().await;
    resources.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn delete_resource(
    State(db): State<Db>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let mut resources = db.write().await;
    resources.remove(&id).map(|_| StatusCode::NO_CONTENT).ok_or(StatusCode::NOT_FOUND)
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

/// `size` bytes cycling through `a..=z`.
async fn blob(Path(size): Path<usize>) -> Vec<u8> {
    blob_bytes(size)
}

pub fn blob_bytes(size: usize) -> Vec<u8> {
    (b'a'..=b'z').cycle().take(size).collect()
}

async fn echo(headers: HeaderMap, body: Bytes) -> (StatusCode, HeaderMap, Bytes) {
    let mut out = HeaderMap::new();
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        out.insert(header::CONTENT_TYPE, content_type.clone());
    }
    (StatusCode::OK, out, body)
}

async fn stall() -> &'static str {
    tokio::time::sleep(STALL).await;
    "too late"
}
