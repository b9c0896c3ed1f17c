use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classification::Classification;

pub const HEALTH_MESSAGE: &str = "API is running successfully 🚀";

/// Liveness response for `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Detailed status for `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
    /// Model kind name to whether it is resident
    pub models: BTreeMap<String, bool>,
}

/// Expression classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub caption: String,
    pub class_id: usize,
    pub confidence: f32,
}

impl From<Classification> for PredictResponse {
    fn from(c: Classification) -> Self {
        Self {
            caption: c.label,
            class_id: c.class_index,
            confidence: c.confidence,
        }
    }
}

/// Form body of `POST /chat`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatForm {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
