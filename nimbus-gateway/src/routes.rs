//! Axum route handlers for the Nimbus gateway API.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use nimbus_core::{ErrorKind, VmId, VmListing, VmSnapshot};
use nimbus_executor::{OpOutcome, ProcessBackend, VmLifecycleManager};
use nimbus_storage::{BlobStore, EdgeCache};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::GatewayError;

// ── Shared state ─────────────────────────────────────────────────────────────

/// Lifecycle manager driven by the HTTP layer.
pub type Manager = VmLifecycleManager<ProcessBackend>;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: Arc<Manager>,
    pub blobs: BlobStore,
    pub cdn: EdgeCache,
}

impl AppState {
    #[must_use]
    pub fn new(manager: Arc<Manager>, blobs: BlobStore, cdn: EdgeCache) -> Self {
        Self { manager, blobs, cdn }
    }
}

// ── Response types ────────────────────────────────────────────────────────────

/// Body of every successful mutation.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
    /// Set when the operation succeeded but had to force-kill a worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<ErrorKind>,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), warning: None }
    }
}

impl From<OpOutcome> for MessageResponse {
    fn from(outcome: OpOutcome) -> Self {
        Self {
            message: outcome.message,
            warning: outcome.termination.and_then(|t| t.warning()),
        }
    }
}

/// Body of `GET /get_file`.
#[derive(Debug, Serialize)]
pub struct EdgeFileResponse {
    pub content: String,
    pub server: String,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router over `state`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/start_vm/{id}", post(start_vm))
        .route("/stop_vm/{id}", post(stop_vm))
        .route("/delete_vm/{id}", delete(delete_vm))
        .route("/monitor_vm/{id}", get(monitor_vm))
        .route("/display_vms", get(display_vms))
        .route("/create_bucket/{bucket}", post(create_bucket))
        .route("/upload_file/{bucket}/{file}", post(upload_file))
        .route("/delete_file/{bucket}/{file}", delete(delete_file))
        .route("/delete_bucket/{bucket}", delete(delete_bucket))
        .route("/upload_to_origin/{file}", post(upload_to_origin))
        .route("/get_file/{file}/{location}", get(get_file))
        .route("/delete_from_origin/{file}", delete(delete_from_origin))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /`: banner.
pub async fn home() -> impl IntoResponse {
    Json(MessageResponse::new("Cloud Simulator is running!"))
}

/// `GET /health`: liveness check.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// `POST /start_vm/{id}`: start or restart a VM.
///
/// # Errors
/// 409 if already running, 500 if the worker cannot be spawned.
pub async fn start_vm(
    State(state): State<AppState>,
    path: Result<Path<u32>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(id) = path?;
    let outcome = state.manager.start(VmId(id)).await?;
    Ok(Json(outcome.into()))
}

/// `POST /stop_vm/{id}`: stop a running VM.
///
/// # Errors
/// 404 for an unknown VM, 409 if already stopped.
pub async fn stop_vm(
    State(state): State<AppState>,
    path: Result<Path<u32>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(id) = path?;
    let outcome = state.manager.stop(VmId(id)).await?;
    Ok(Json(outcome.into()))
}

/// `DELETE /delete_vm/{id}`: stop if needed, then forget a VM.
///
/// # Errors
/// 404 for an unknown VM.
pub async fn delete_vm(
    State(state): State<AppState>,
    path: Result<Path<u32>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(id) = path?;
    let outcome = state.manager.delete(VmId(id)).await?;
    Ok(Json(outcome.into()))
}

/// `GET /monitor_vm/{id}`
///
/// # Errors
/// 404 for an unknown VM.
pub async fn monitor_vm(
    State(state): State<AppState>,
    path: Result<Path<u32>, PathRejection>,
) -> Result<Json<VmSnapshot>, GatewayError> {
    let Path(id) = path?;
    Ok(Json(state.manager.monitor(VmId(id))?))
}

/// `GET /display_vms`
pub async fn display_vms(State(state): State<AppState>) -> Json<VmListing> {
    Json(state.manager.list())
}

/// `POST /create_bucket/{bucket}`
///
/// # Errors
/// 409 if the bucket exists, 400 for a bad name.
pub async fn create_bucket(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(bucket) = path?;
    state.blobs.create_container(&bucket).await?;
    Ok(Json(MessageResponse::new(format!("Bucket {bucket} created!"))))
}

/// `POST /upload_file/{bucket}/{file}`: the raw request body is the content.
///
/// # Errors
/// 404 if the bucket is missing, 400 for a bad name.
pub async fn upload_file(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Bytes,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path((bucket, file)) = path?;
    state.blobs.put_blob(&bucket, &file, &body).await?;
    Ok(Json(MessageResponse::new(format!("File {file} uploaded to {bucket}!"))))
}

/// `DELETE /delete_file/{bucket}/{file}`
///
/// # Errors
/// 404 if the file is missing.
pub async fn delete_file(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path((bucket, file)) = path?;
    state.blobs.delete_blob(&bucket, &file).await?;
    Ok(Json(MessageResponse::new(format!("File {file} deleted from {bucket}!"))))
}

/// `DELETE /delete_bucket/{bucket}`
///
/// # Errors
/// 404 if the bucket is missing, 409 if it is not empty.
pub async fn delete_bucket(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(bucket) = path?;
    state.blobs.delete_container(&bucket).await?;
    Ok(Json(MessageResponse::new(format!("Bucket {bucket} deleted!"))))
}

/// `POST /upload_to_origin/{file}`: publish and replicate to every edge.
///
/// # Errors
/// 400 for a bad name, 500 on filesystem failure.
pub async fn upload_to_origin(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    body: Bytes,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(file) = path?;
    state.cdn.publish(&file, &body).await?;
    Ok(Json(MessageResponse::new(format!(
        "File {file} uploaded to origin. File {file} replicated to all edge servers."
    ))))
}

/// `GET /get_file/{file}/{location}`: serve from the edge nearest `location`.
///
/// # Errors
/// 404 if the chosen edge holds no copy.
pub async fn get_file(
    State(state): State<AppState>,
    path: Result<Path<(String, i64)>, PathRejection>,
) -> Result<Json<EdgeFileResponse>, GatewayError> {
    let Path((file, location)) = path?;
    let fetched = state.cdn.fetch(&file, location).await?;
    Ok(Json(EdgeFileResponse {
        content: String::from_utf8_lossy(&fetched.content).into_owned(),
        server: fetched.edge,
    }))
}

/// `DELETE /delete_from_origin/{file}`
///
/// # Errors
/// 404 if the origin holds no copy.
pub async fn delete_from_origin(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<MessageResponse>, GatewayError> {
    let Path(file) = path?;
    state.cdn.retract(&file).await?;
    Ok(Json(MessageResponse::new(format!(
        "File {file} deleted from origin and all edge servers."
    ))))
}
