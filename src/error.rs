//! Error types for the request dispatcher

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("application '{0}' is not ready")]
    ApplicationNotReady(String),

    #[error("no idle worker found after {probes} probes")]
    DispatchExhausted { probes: usize },

    #[error("worker accepted the request but did not finish within {timeout_ms}ms")]
    HandoffTimeout { timeout_ms: u64 },

    #[error("unknown application '{0}'")]
    UnknownApplication(String),

    #[error("worker terminated before publishing a result")]
    WorkerGone,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            DispatchError::ApplicationNotReady(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            DispatchError::DispatchExhausted { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            DispatchError::HandoffTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, self.to_string())
            }
            DispatchError::UnknownApplication(_) => (StatusCode::NOT_FOUND, self.to_string()),
            DispatchError::WorkerGone => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            DispatchError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
