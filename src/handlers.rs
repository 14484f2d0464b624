//! HTTP handlers: the container surface in front of the dispatcher

use crate::error::DispatchError;
use crate::exchange::{Exchange, ServerRequest};
use crate::state::AppState;
use axum::{
    extract::{Path, Request, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::info;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "valvehost"
    }))
}

/// Hosting info endpoint
pub async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "applications": state.registry.names(),
        "pool_size": state.dispatcher.pool().pool_size(),
        "dispatch_probes": state.config.dispatch_probes,
        "handoff_timeout_ms": state.config.handoff_timeout_ms,
    }))
}

/// `/apps/{app}` — application root
pub async fn dispatch_root(
    State(state): State<Arc<AppState>>,
    Path(app): Path<String>,
    req: Request,
) -> Result<Response, DispatchError> {
    dispatch_request(state, app, req).await
}

/// `/apps/{app}/{*path}` — everything below the application root
pub async fn dispatch_path(
    State(state): State<Arc<AppState>>,
    Path((app, _rest)): Path<(String, String)>,
    req: Request,
) -> Result<Response, DispatchError> {
    dispatch_request(state, app, req).await
}

/// Resolve the application, wrap the transport request into an exchange,
/// dispatch it, and copy the published response state back out.
async fn dispatch_request(
    state: Arc<AppState>,
    app_name: String,
    req: Request,
) -> Result<Response, DispatchError> {
    let app = state
        .registry
        .get(&app_name)
        .ok_or_else(|| DispatchError::UnknownApplication(app_name.clone()))?;

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, state.config.max_body_bytes)
        .await
        .map_err(|e| DispatchError::Internal(e.to_string()))?;

    let request = ServerRequest::new(
        parts.method,
        parts.uri.path().to_string(),
        parts.headers,
        body,
    );
    info!(app = %app_name, id = %request.id, "dispatching request");

    let response = state.dispatcher.dispatch(&app, Exchange::new(request)).await?;
    Ok(response.into_response())
}
