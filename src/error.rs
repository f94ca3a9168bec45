//! Error taxonomy and HTTP mapping
//!
//! spec.md §7 splits errors into validation/not-found/conflict/persistence
//! (which abort the handler with a status code) versus transport/script
//! errors (which never abort the handler and are carried inside the result
//! payload instead). This enum models only the former group.

use axum::{http::StatusCode, response::IntoResponse, response::Json};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<crate::domain::PortError> for AppError {
    fn from(e: crate::domain::PortError) -> Self {
        match e {
            crate::domain::PortError::NotFound(msg) => AppError::NotFound(msg),
            crate::domain::PortError::Conflict(msg) => AppError::Conflict(msg),
            crate::domain::PortError::Validation(msg) => AppError::Validation(msg),
            crate::domain::PortError::Db(e) => AppError::Persistence(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Persistence(e) => {
                tracing::error!("persistence error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "a persistence error occurred".to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("io error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "a storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
