use axum::Router;

use crate::AppState;

pub mod backups;
pub mod jobs;
pub mod scheduler;
pub mod server;
pub mod status;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/status", status::routes())
        .nest("/server", server::routes())
        .nest("/backups", backups::routes())
        .nest("/scheduler", scheduler::routes())
        .merge(jobs::routes())
}
