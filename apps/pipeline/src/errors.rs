use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ingest::IngestError;
use crate::learning::LearningError;
use crate::storage::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Store(StoreError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"))
            }
            AppError::Store(e) => {
                tracing::error!("Storage error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Ingest(IngestError::EmptyBatch) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                IngestError::EmptyBatch.to_string(),
            ),
            AppError::Ingest(e) => {
                tracing::error!("Ingestion error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INGEST_ERROR",
                    "The upload could not be stored".to_string(),
                )
            }
            AppError::Learning(e @ LearningError::InsufficientCorpus { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, e.code(), e.to_string())
            }
            AppError::Learning(e @ LearningError::FineTuneDisabled) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.code(), e.to_string())
            }
            AppError::Learning(e) => {
                tracing::error!("Learning error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.code(),
                    "The learning operation failed".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
