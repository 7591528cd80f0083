use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::backup_service::BackupError;
use crate::services::job_lock::BusyError;
use crate::services::restore::RestoreError;
use crate::services::server_api::ServerError;
use crate::services::transfer::TransferError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let msg = match &self {
            AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::Conflict(msg)
            | AppError::Unavailable(msg)
            | AppError::Upstream(msg)
            | AppError::Internal(msg) => msg.clone(),
        };
        (self.status(), Json(serde_json::json!({ "error": msg }))).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<BusyError> for AppError {
    fn from(err: BusyError) -> Self {
        AppError::Conflict(err.to_string())
    }
}

impl From<ServerError> for AppError {
    fn from(err: ServerError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<BackupError> for AppError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::Busy(busy) => busy.into(),
            BackupError::NotFound(id) => AppError::NotFound(format!("Backup {} not found", id)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RestoreError> for AppError {
    fn from(err: RestoreError) -> Self {
        match err {
            RestoreError::Busy(busy) => busy.into(),
            RestoreError::NotFound(id) => AppError::NotFound(format!("Backup {} not found", id)),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Connect { .. } | TransferError::Connection(_) => {
                AppError::Upstream(err.to_string())
            }
            TransferError::Busy(_) => AppError::Conflict(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
