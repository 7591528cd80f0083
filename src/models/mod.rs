pub mod backup;
pub mod status;
