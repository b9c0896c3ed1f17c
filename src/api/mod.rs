mod routes;
mod types;

pub use routes::create_router;
pub use types::*;

use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::error::InferenceError;
use crate::registry::ModelRegistry;

/// Shared application state
pub struct AppState {
    pub registry: ModelRegistry,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(registry: ModelRegistry, max_upload_bytes: usize) -> Self {
        Self {
            registry,
            max_upload_bytes,
        }
    }
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error!("Request failed ({}): {}", status, self);
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
