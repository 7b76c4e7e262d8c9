use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Errors surfaced by the personalization engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// No owned item contributed eligible weight. Client-actionable.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// The caller is not entitled to a premium feature. Distinct from auth failures.
    #[error("Premium entitlement required for {0}")]
    PremiumRequired(&'static str),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Configured and supplied vector sizes disagree. Fatal at startup and ingestion.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Messaging error: {0}")]
    Messaging(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InsufficientData(_) => "INSUFFICIENT_DATA",
            EngineError::PremiumRequired(_) => "PREMIUM_REQUIRED",
            EngineError::Validation(_) => "VALIDATION_FAILED",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            EngineError::VectorStore(_) => "VECTOR_STORE",
            EngineError::Timeout(_) => "TIMEOUT",
            EngineError::Database(_) => "DATABASE",
            EngineError::Cache(_) => "CACHE",
            EngineError::Embedding(_) => "EMBEDDING_PROVIDER",
            EngineError::Messaging(_) => "MESSAGING",
            EngineError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::PremiumRequired(_) => StatusCode::PAYMENT_REQUIRED,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EngineError::Embedding(_) => StatusCode::BAD_GATEWAY,
            EngineError::DimensionMismatch { .. }
            | EngineError::VectorStore(_)
            | EngineError::Database(_)
            | EngineError::Cache(_)
            | EngineError::Messaging(_)
            | EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<crate::models::IdParseError> for EngineError {
    fn from(err: crate::models::IdParseError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
