use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, AppState};
use crate::chain::ChainClient;
use crate::config::ServerConfig;
use crate::db::{DbHandle, ProjectDb};
use crate::pipeline::DeployService;

/// Bounded startup probe of the chain node (see `ChainClient::connect`).
const CONNECT_ATTEMPTS: u32 = 10;

/// Build the application router around explicit, pre-constructed state.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Connect to the chain node, open the project store, and serve until
/// interrupted. A node that stays unreachable past the bounded retry
/// budget fails startup; there is no silent wait-forever loop.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let chain = ChainClient::connect(&config.rpc_url, CONNECT_ATTEMPTS)
        .await
        .context("Failed to connect to chain node")?;
    info!(rpc_url = %config.rpc_url, "connected to chain node");

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let db = DbHandle::new(
        ProjectDb::new(&config.db_path).context("Failed to initialize project database")?,
    );

    let service = Arc::new(DeployService::new(
        Arc::new(chain),
        db,
        config.workspace_root.clone(),
    ));
    let state = Arc::new(AppState { service });

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("anvilhub API running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubNode;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn test_state(node: &StubNode) -> Arc<AppState> {
        let chain = Arc::new(ChainClient::new(&node.url()));
        let db = DbHandle::new(ProjectDb::new_in_memory().unwrap());
        let workspace_root = tempfile::tempdir().unwrap().keep();
        let service = Arc::new(DeployService::new(chain, db, workspace_root));
        Arc::new(AppState { service })
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listing_starts_empty() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/projects")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!([]));
    }

    #[tokio::test]
    async fn unknown_project_is_404() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/projects/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn archive_hides_project_from_default_listing() {
        let node = StubNode::start().await;
        let state = test_state(&node).await;

        let project = state
            .service
            .db()
            .call(|db| db.upsert_project("https://github.com/acme/vault.git"))
            .await
            .unwrap();

        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/projects/{}/archive", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "archived");

        let resp = build_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/projects")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 0);

        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/projects?includeArchived=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn archiving_unknown_project_is_404() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/projects/77/archive")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deploy_without_repo_url_is_400() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/projects/deploy")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"useNpm": false}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("Repository URL"));
    }

    #[tokio::test]
    async fn deploy_failure_streams_status_then_terminal_error() {
        let node = StubNode::start().await;

        // Point the workspace root at a regular file so workspace
        // creation fails before any external tool runs.
        let dir = tempfile::tempdir().unwrap();
        let blocked_root = dir.path().join("blocked");
        std::fs::write(&blocked_root, "not a directory").unwrap();

        let chain = Arc::new(ChainClient::new(&node.url()));
        let db = DbHandle::new(ProjectDb::new_in_memory().unwrap());
        let service = Arc::new(DeployService::new(chain, db, blocked_root));
        let state = Arc::new(AppState { service });

        let resp = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/projects/deploy")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"repoUrl": "https://github.com/acme/vault.git"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[axum::http::header::CONTENT_TYPE],
            "application/x-ndjson"
        );

        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        let frames: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert!(frames.len() >= 2);
        assert_eq!(frames[0]["status"], "Creating workspace directory...");
        let terminal = frames.last().unwrap();
        assert_eq!(terminal["error"], "Failed to prepare workspace");
        assert!(terminal["details"].is_string());
        // every non-terminal frame is a status frame
        for frame in &frames[..frames.len() - 1] {
            assert!(frame["status"].is_string());
        }
    }

    #[tokio::test]
    async fn anvil_passthrough_forwards_known_methods() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/anvil/mine")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"params": [3, 0]}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["result"], json!(true));

        let calls = node.calls().await;
        let (method, params) = calls.last().unwrap();
        assert_eq!(method, "anvil_mine");
        assert_eq!(params, &json!([3, 0]));
    }

    #[tokio::test]
    async fn anvil_passthrough_rejects_unknown_methods() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/anvil/evilMethod")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"params": []}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(node.calls().await.is_empty());
    }

    #[tokio::test]
    async fn contract_details_for_unknown_address_is_404() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/contracts/0x0000000000000000000000000000000000000001")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blockchain_status_reports_chain_state() {
        let node = StubNode::start().await;
        let app = build_router(test_state(&node).await);
        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/api/blockchain-status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["chainId"], "31337");
        assert_eq!(body["blockNumber"], 0);
    }
}
