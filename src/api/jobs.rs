use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::AppError;
use crate::services::backup_service::BackupOutcome;
use crate::services::job_lock::JobKind;
use crate::services::restore::RestoreStatus;
use crate::services::transfer::ProgressReport;
use crate::utils::units::format_megabytes;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub restore: Option<RestoreStatus>,
    pub upload: Option<ProgressReport>,
}

#[derive(Debug, Serialize)]
pub struct TransfersResponse {
    pub busy: bool,
    pub job: Option<JobKind>,
    pub download: Option<ProgressReport>,
    pub upload: Option<ProgressReport>,
    pub last_backup: Option<BackupOutcome>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/restore", get(get_restore))
        .route("/transfers", get(get_transfers))
        .route("/saves/size", get(get_saves_size))
}

#[derive(Debug, Serialize)]
pub struct SavesSizeResponse {
    pub path: String,
    pub bytes: u64,
    pub size: String,
}

async fn get_restore(State(state): State<AppState>) -> Json<RestoreResponse> {
    Json(RestoreResponse {
        restore: state.restorer.current(),
        upload: state.transfers.upload_progress().map(|p| p.report()),
    })
}

async fn get_transfers(State(state): State<AppState>) -> Json<TransfersResponse> {
    Json(TransfersResponse {
        busy: state.jobs.is_busy(),
        job: state.jobs.current(),
        download: state.transfers.download_progress().map(|p| p.report()),
        upload: state.transfers.upload_progress().map(|p| p.report()),
        last_backup: state.backup_service.last_outcome(),
    })
}

/// Size of what the next backup would download, blacklist applied.
async fn get_saves_size(
    State(state): State<AppState>,
) -> Result<Json<SavesSizeResponse>, AppError> {
    let ftp = state.config.snapshot().ftp;
    let bytes = state.transfers.folder_size(&ftp.dir, &ftp.blacklist).await?;

    Ok(Json(SavesSizeResponse {
        path: ftp.dir,
        bytes,
        size: format_megabytes(bytes),
    }))
}
