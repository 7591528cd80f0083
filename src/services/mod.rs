pub mod backup_service;
pub mod job_lock;
pub mod restore;
pub mod scheduler;
pub mod server_api;
pub mod status_poller;
pub mod transfer;
