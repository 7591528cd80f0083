use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::error::AppError;
use crate::models::backup::BackupRecord;
use crate::services::job_lock::JobKind;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct JobStarted {
    pub job: JobKind,
    pub backup_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RescanResponse {
    pub loaded: usize,
    pub failures: Vec<RescanFailure>,
}

#[derive(Debug, Serialize)]
pub struct RescanFailure {
    pub id: String,
    pub error: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_backups).post(create_backup))
        .route("/rescan", post(rescan_backups))
        .route("/:id", get(get_backup).delete(delete_backup))
        .route("/:id/restore", post(restore_backup))
}

async fn list_backups(State(state): State<AppState>) -> Json<Vec<BackupRecord>> {
    Json(state.backups.list())
}

async fn create_backup(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<JobStarted>), AppError> {
    let guard = state.jobs.try_acquire(JobKind::ManualBackup)?;
    state.backup_service.spawn(guard);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobStarted {
            job: JobKind::ManualBackup,
            backup_id: None,
        }),
    ))
}

async fn rescan_backups(State(state): State<AppState>) -> Result<Json<RescanResponse>, AppError> {
    let failures = state
        .backups
        .rescan()
        .map_err(|e| AppError::Internal(format!("Failed to read backup directory: {}", e)))?;

    Ok(Json(RescanResponse {
        loaded: state.backups.list().len(),
        failures: failures
            .into_iter()
            .map(|(id, e)| RescanFailure {
                id,
                error: e.to_string(),
            })
            .collect(),
    }))
}

async fn get_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BackupRecord>, AppError> {
    state
        .backups
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.backup_service.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobStarted>), AppError> {
    state.restorer.spawn(&id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobStarted {
            job: JobKind::Restore,
            backup_id: Some(id),
        }),
    ))
}
