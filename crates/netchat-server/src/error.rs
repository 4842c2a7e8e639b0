use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use netchat_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The dispatch loop has stopped and no longer accepts events.
    #[error("Dispatch loop is not running")]
    DispatchClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Store error".to_string())
            }
            ServerError::DispatchClosed => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ServerError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
