use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ScheduledBackup,
    ManualBackup,
    Restore,
    DeleteBackup,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::ScheduledBackup => write!(f, "scheduled backup"),
            JobKind::ManualBackup => write!(f, "manual backup"),
            JobKind::Restore => write!(f, "restore"),
            JobKind::DeleteBackup => write!(f, "backup deletion"),
        }
    }
}

#[derive(Debug, Error)]
#[error("{}", describe_holder(.held_by))]
pub struct BusyError {
    pub held_by: Option<JobKind>,
}

fn describe_holder(held_by: &Option<JobKind>) -> String {
    match held_by {
        Some(kind) => format!("a {} is already running", kind),
        None => "another job is already running".to_string(),
    }
}

/// Serializes every job touching the save directory or the backup root: a
/// backup must never read the save directory while a restore is writing it,
/// and a restore must never upload a backup that is being deleted.
#[derive(Clone, Default)]
pub struct JobLock {
    inner: Arc<tokio::sync::Mutex<()>>,
    holder: Arc<Mutex<Option<JobKind>>>,
}

/// Held for the whole duration of a job. Dropping it frees the lock.
pub struct JobGuard {
    kind: JobKind,
    holder: Arc<Mutex<Option<JobKind>>>,
    _guard: OwnedMutexGuard<()>,
}

impl JobGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        let mut holder = match self.holder.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        *holder = None;
    }
}

impl JobLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, kind: JobKind) -> Result<JobGuard, BusyError> {
        let guard = self.inner.clone().try_lock_owned().map_err(|_| BusyError {
            held_by: self.current(),
        })?;

        let mut holder = match self.holder.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        *holder = Some(kind);

        Ok(JobGuard {
            kind,
            holder: self.holder.clone(),
            _guard: guard,
        })
    }

    pub fn current(&self) -> Option<JobKind> {
        match self.holder.lock() {
            Ok(h) => *h,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }
}
