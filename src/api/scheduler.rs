use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};
use crate::error::AppError;
use crate::services::scheduler::SchedulerState;
use crate::services::transfer::ProgressReport;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SchedulerResponse {
    pub state: SchedulerState,
    pub enabled: bool,
    pub interval: u32,
    pub min_interval: u32,
    pub max_interval: u32,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub download: Option<ProgressReport>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchedulerRequest {
    pub interval: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_scheduler).put(update_scheduler))
        .route("/enable", post(enable_scheduler))
        .route("/disable", post(disable_scheduler))
}

fn report(state: &AppState) -> SchedulerResponse {
    let config = state.config.snapshot();
    SchedulerResponse {
        state: state.scheduler.state(),
        enabled: config.auto_backup,
        interval: config.interval,
        min_interval: MIN_INTERVAL_MINUTES,
        max_interval: MAX_INTERVAL_MINUTES,
        last_run: config.last_run,
        next_run: state.scheduler.next_run(),
        download: state.transfers.download_progress().map(|p| p.report()),
    }
}

async fn get_scheduler(State(state): State<AppState>) -> Json<SchedulerResponse> {
    Json(report(&state))
}

async fn update_scheduler(
    State(state): State<AppState>,
    Json(body): Json<UpdateSchedulerRequest>,
) -> Result<Json<SchedulerResponse>, AppError> {
    if state.scheduler.is_started() {
        return Err(AppError::BadRequest(
            "Disable the scheduler before changing its interval".into(),
        ));
    }

    state.config.update(|c| c.set_interval(body.interval))?;
    Ok(Json(report(&state)))
}

async fn enable_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerResponse>, AppError> {
    state.config.update(|c| c.auto_backup = true)?;
    state.scheduler.start();
    Ok(Json(report(&state)))
}

async fn disable_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SchedulerResponse>, AppError> {
    state.config.update(|c| c.auto_backup = false)?;
    state.scheduler.stop();
    Ok(Json(report(&state)))
}
