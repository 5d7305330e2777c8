use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::anvil;
use crate::errors::DeployError;
use crate::pipeline::DeployService;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: Arc<DeployService>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct DeployRequest {
    #[serde(rename = "repoUrl")]
    pub repo_url: Option<String>,
    #[serde(rename = "useNpm", default)]
    pub use_npm: bool,
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "includeArchived", default)]
    pub include_archived: bool,
}

#[derive(Deserialize)]
pub struct AnvilRequest {
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        match e {
            DeployError::Validation(msg) => ApiError::BadRequest(msg),
            DeployError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(format!("{}: {}", other.summary(), other.detail())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects))
        .route("/api/projects/deploy", post(deploy_project))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/archive", post(archive_project))
        .route("/api/contracts/{address}", get(get_contract_details))
        .route("/api/anvil/{method}", post(anvil_passthrough))
        .route("/api/blockchain-status", get(blockchain_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

/// Kick off a full clone-build-deploy run and stream its progress as
/// newline-delimited JSON: one `{"status": ...}` object per stage, then
/// exactly one terminal object (result or error), then end-of-stream.
/// The first byte goes out as soon as the first stage starts; nothing
/// is buffered until completion.
async fn deploy_project(
    State(state): State<SharedState>,
    Json(req): Json<DeployRequest>,
) -> Result<Response, ApiError> {
    let repo_url = req
        .repo_url
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    if repo_url.is_empty() {
        return Err(ApiError::BadRequest("Repository URL is required".to_string()));
    }

    let (frame_tx, frame_rx) = mpsc::channel::<String>(32);
    let service = state.service.clone();
    let use_npm = req.use_npm;

    tokio::spawn(async move {
        let (status_tx, mut status_rx) = mpsc::channel::<String>(32);
        let run = tokio::spawn(async move {
            service.clone_and_deploy(&repo_url, use_npm, &status_tx).await
        });

        // Forward status lines as they occur; the loop ends when the
        // run finishes and drops its sender.
        while let Some(message) = status_rx.recv().await {
            let frame = json!({"status": message}).to_string();
            if frame_tx.send(frame).await.is_err() {
                // Client went away; let the run finish on its own.
                return;
            }
        }

        let terminal = match run.await {
            Ok(Ok(result)) => json!({"deployedContracts": result}),
            Ok(Err(e)) => json!({"error": e.summary(), "details": e.detail()}),
            Err(e) => json!({"error": "Failed to process contracts", "details": e.to_string()}),
        };
        let _ = frame_tx.send(terminal.to_string()).await;
    });

    let stream = futures_util::stream::unfold(frame_rx, |mut rx| async move {
        rx.recv().await.map(|line| {
            (
                Ok::<_, std::convert::Infallible>(Bytes::from(line + "\n")),
                rx,
            )
        })
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
        .expect("static response parts"))
}

async fn list_projects(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let include_archived = query.include_archived;
    let projects = state
        .service
        .db()
        .call(move |db| db.list_projects(include_archived))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .service
        .db()
        .call(move |db| db.get_project(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match project {
        Some(project) => Ok(Json(project)),
        None => Err(ApiError::NotFound(format!("Project {} not found", id))),
    }
}

async fn archive_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .service
        .db()
        .call(move |db| db.archive_project(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match project {
        Some(project) => Ok(Json(project)),
        None => Err(ApiError::NotFound(format!("Project {} not found", id))),
    }
}

async fn get_contract_details(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let details = state.service.get_contract_details(&address).await?;
    Ok(Json(details))
}

/// Forward a whitelisted node-control method to the chain endpoint.
async fn anvil_passthrough(
    State(state): State<SharedState>,
    Path(method): Path<String>,
    Json(req): Json<AnvilRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let params = req.params.unwrap_or_else(|| json!([]));
    if !params.is_array() {
        return Err(ApiError::BadRequest("params must be an array".to_string()));
    }
    let result = anvil::forward(state.service.chain(), &method, params).await?;
    Ok(Json(json!({"result": result})))
}

async fn blockchain_status(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let chain = state.service.chain();
    let block_number = chain
        .block_number()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to connect to chain node: {}", e)))?;
    let chain_id = chain
        .chain_id()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to connect to chain node: {}", e)))?;
    Ok(Json(json!({
        "blockNumber": block_number,
        "chainId": chain_id,
        "nodeInfo": "Connected to Anvil node",
    })))
}
