use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::FormRejection, DefaultBodyLimit, Multipart,
        State,
    },
    routing::{get, post},
    Form, Json, Router,
};
use tracing::info;
use uuid::Uuid;

use super::types::*;
use super::AppState;
use crate::classification::classify;
use crate::conversation::respond;
use crate::device::device_info;
use crate::error::{InferenceError, Result};
use crate::registry::ModelKind;

const UPLOAD_FIELD: &str = "file";

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/predict", post(predict).layer(upload_limit))
        .route("/chat", post(chat))
        .with_state(state)
}

async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: HEALTH_MESSAGE.to_string(),
    })
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = &state.registry;
    let models = [ModelKind::ImageClassifier, ModelKind::ConversationalGenerator]
        .into_iter()
        .map(|kind| (kind.to_string(), registry.is_loaded(kind)))
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        device: device_info(registry.device()),
        models,
    })
}

async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>> {
    let request_id = Uuid::new_v4();
    let mut multipart = multipart.map_err(|e| InferenceError::BadRequest(e.body_text()))?;
    let image_bytes = read_upload(&mut multipart).await?;

    info!(%request_id, "Predict request: {} bytes", image_bytes.len());

    let result = classify(&state.registry, image_bytes).await?;
    info!(
        %request_id,
        "Predicted {} (class {}, confidence {:.3})",
        result.label,
        result.class_index,
        result.confidence
    );
    Ok(Json(result.into()))
}

async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InferenceError::BadRequest(e.body_text()))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| InferenceError::BadRequest(e.body_text()))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(InferenceError::BadRequest(format!(
        "missing multipart field `{}`",
        UPLOAD_FIELD
    )))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    form: std::result::Result<Form<ChatForm>, FormRejection>,
) -> Result<Json<ChatResponse>> {
    let request_id = Uuid::new_v4();
    let Form(ChatForm { prompt }) = form.map_err(|e| InferenceError::BadRequest(e.body_text()))?;

    info!(%request_id, "Chat request: prompt_len={}", prompt.len());

    let reply = respond(&state.registry, prompt).await?;
    info!(%request_id, "Chat reply: {} chars", reply.len());
    Ok(Json(ChatResponse { reply }))
}
