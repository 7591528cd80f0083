use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::error::AppError;
use crate::services::server_api::LifecycleCommand;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub command: LifecycleCommand,
    /// Transport status returned by the hosting API.
    pub status_code: u16,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/:command", post(send_command))
}

async fn send_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
) -> Result<Json<CommandResponse>, AppError> {
    let (command, status_code) = match command.as_str() {
        "start" => (LifecycleCommand::Start, state.server.start().await?),
        "stop" => (LifecycleCommand::Stop, state.server.stop().await?),
        "restart" => (LifecycleCommand::Restart, state.server.restart().await?),
        other => return Err(AppError::BadRequest(format!("Unknown command: {}", other))),
    };
    Ok(Json(CommandResponse {
        command,
        status_code,
    }))
}
