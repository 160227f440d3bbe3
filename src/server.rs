//! HTTP boundary: webhook intake and status endpoints.
//!
//! The webhook handler verifies the HMAC signature against the raw body
//! before touching the payload, filters to push events, and hands accepted
//! events to the pipeline. It responds 202 immediately; deployment outcomes
//! never flow back to the sender.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::models::PushEvent;
use crate::pipeline::DeploymentPipeline;
use crate::registry::RepositoryRegistry;
use crate::signature::Signature;

pub struct AppState {
    pub registry: Arc<RepositoryRegistry>,
    pub pipeline: Arc<DeploymentPipeline>,
    pub webhook_secret: String,
}

pub type SharedState = Arc<AppState>;

pub struct ServerConfig {
    pub port: u16,
    pub dev_mode: bool,
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/repositories", get(list_repositories))
        .route("/webhook", post(webhook))
        .with_state(state)
}

async fn root(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "deployer",
        "status": "running",
        "repositories": state.registry.len(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn list_repositories(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let repos: Vec<serde_json::Value> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|repo| {
            serde_json::json!({
                "path": repo.path,
                "remote_url": repo.remote_url,
                "branch": repo.branch,
                "command": repo.config.command,
            })
        })
        .collect();
    Json(serde_json::json!({
        "count": repos.len(),
        "repositories": repos,
    }))
}

async fn webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Signature check runs on the raw bytes, before any parsing.
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !Signature(signature).is_valid(&body, &state.webhook_secret) {
        warn!("Rejected webhook with invalid signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Invalid signature"})),
        )
            .into_response();
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if event_type != "push" {
        info!(event_type, "Ignoring non-push event");
        return (
            StatusCode::OK,
            Json(serde_json::json!({"status": "ignored", "reason": "not a push event"})),
        )
            .into_response();
    }

    let event: PushEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected malformed push payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Malformed payload"})),
            )
                .into_response();
        }
    };

    let repository = event.repository.full_name.clone();
    let branch = event.branch_name().to_string();
    state.pipeline.dispatch(event);

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "accepted",
            "repository": repository,
            "branch": branch,
        })),
    )
        .into_response()
}

/// Bind and serve until Ctrl+C.
pub async fn start_server(state: SharedState, config: ServerConfig) -> Result<()> {
    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Deployment agent listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
