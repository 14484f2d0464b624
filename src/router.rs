use axum::{
    routing::{any, get},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    request_id::MakeRequestUuid, timeout::TimeoutLayer, trace::TraceLayer, ServiceBuilderExt,
};

use crate::handlers::{dispatch_path, dispatch_root, health, info};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/health", get(health))
        .route("/api/info", get(info))
        // Hosted applications
        .route("/apps/{app}", any(dispatch_root))
        .route("/apps/{app}/{*path}", any(dispatch_path))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .set_x_request_id(MakeRequestUuid)
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    state.config.request_timeout_secs,
                ))),
        )
        // Shared state
        .with_state(state)
}
