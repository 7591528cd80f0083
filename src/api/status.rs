use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::AppError;
use crate::models::status::ServerStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: ServerStatus,
    pub days_remaining: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(get_status))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let snapshot = state.status.latest().ok_or_else(|| {
        AppError::Unavailable("No status received from the hosting API yet".into())
    })?;

    Ok(Json(StatusResponse {
        days_remaining: snapshot.days_remaining(Utc::now().date_naive()),
        status: (*snapshot).clone(),
    }))
}
