use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Hub error: {0}")]
    Hub(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl InferenceError {
    /// HTTP status reported for this failure kind.
    ///
    /// Client input problems are 4xx, anything that went wrong while fetching
    /// or reading model artifacts is 503 (a later request may succeed once the
    /// source is reachable), and runtime failures are 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            InferenceError::Decode(_) | InferenceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            InferenceError::ModelLoad(_)
            | InferenceError::Hub(_)
            | InferenceError::Config(_)
            | InferenceError::Io(_)
            | InferenceError::Serde(_) => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::Tokenizer(_)
            | InferenceError::Inference(_)
            | InferenceError::Generation(_)
            | InferenceError::Candle(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<image::ImageError> for InferenceError {
    fn from(e: image::ImageError) -> Self {
        InferenceError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_bad_request() {
        assert_eq!(
            InferenceError::Decode("not an image".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            InferenceError::BadRequest("missing file".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn load_errors_map_to_unavailable() {
        assert_eq!(
            InferenceError::Hub("offline".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            InferenceError::ModelLoad("bad weights".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn runtime_errors_map_to_internal() {
        assert_eq!(
            InferenceError::Generation("empty".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let candle = candle_core::Error::Msg("shape mismatch".into());
        assert_eq!(
            InferenceError::from(candle).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
