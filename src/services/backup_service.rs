use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ConfigStore;
use crate::models::backup::{self, backup_id, BackupLoadError, BackupRecord};
use crate::services::job_lock::{BusyError, JobGuard, JobKind, JobLock};
use crate::services::transfer::{TransferEngine, TransferError};
use crate::utils::units::format_megabytes;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Busy(#[from] BusyError),
    #[error("backup {0} not found")]
    NotFound(String),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("downloaded backup is unusable: {0}")]
    Load(#[from] BackupLoadError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory index of the backups on disk.
pub struct BackupStore {
    root: PathBuf,
    records: RwLock<Vec<BackupRecord>>,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reloads the index from disk. Returns the directories that failed to load.
    pub fn rescan(&self) -> std::io::Result<Vec<(String, BackupLoadError)>> {
        let found = backup::enumerate(&self.root)?;
        let mut records = self.write();
        *records = found.records;
        Ok(found.failures)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<BackupRecord> {
        self.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<BackupRecord> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn register(&self, record: BackupRecord) {
        let mut records = self.write();
        records.retain(|r| r.id != record.id);
        records.push(record);
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    pub fn delete(&self, id: &str) -> Result<BackupRecord, BackupError> {
        let record = self
            .get(id)
            .ok_or_else(|| BackupError::NotFound(id.to_string()))?;
        std::fs::remove_dir_all(&record.path)?;
        self.write().retain(|r| r.id != id);
        info!("🗑️  Deleted backup {}", id);
        Ok(record)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<BackupRecord>> {
        match self.records.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<BackupRecord>> {
        match self.records.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupOutcome {
    pub kind: JobKind,
    pub id: String,
    pub finished_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
    pub error: Option<String>,
}

/// Downloads the remote save directory into a new timestamped backup.
pub struct BackupService {
    engine: Arc<TransferEngine>,
    store: Arc<BackupStore>,
    lock: JobLock,
    config: ConfigStore,
    last: RwLock<Option<BackupOutcome>>,
}

impl BackupService {
    pub fn new(
        engine: Arc<TransferEngine>,
        store: Arc<BackupStore>,
        lock: JobLock,
        config: ConfigStore,
    ) -> Self {
        Self {
            engine,
            store,
            lock,
            config,
            last: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<BackupStore> {
        &self.store
    }

    pub fn last_outcome(&self) -> Option<BackupOutcome> {
        match self.last.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Takes the job lock and runs a backup to completion.
    #[cfg(test)]
    pub async fn run(&self, kind: JobKind) -> Result<BackupRecord, BackupError> {
        let guard = self.lock.try_acquire(kind)?;
        self.run_with_guard(guard).await
    }

    /// Runs a backup under an already-held job lock, released on return.
    pub async fn run_with_guard(&self, guard: JobGuard) -> Result<BackupRecord, BackupError> {
        let kind = guard.kind();
        let id = backup_id(Utc::now());
        let result = self.download(&id).await;
        drop(guard);

        let outcome = BackupOutcome {
            kind,
            id: id.clone(),
            finished_at: Utc::now(),
            size_bytes: result.as_ref().ok().map(|r| r.size_bytes),
            error: result.as_ref().err().map(|e| e.to_string()),
        };
        match self.last.write() {
            Ok(mut last) => *last = Some(outcome),
            Err(poisoned) => *poisoned.into_inner() = Some(outcome),
        }

        match &result {
            Ok(record) => info!(
                "✅ {} {} finished ({})",
                kind,
                record.id,
                format_megabytes(record.size_bytes)
            ),
            Err(e) => error!("❌ {} {} failed: {}", kind, id, e),
        }
        result
    }

    /// Fire-and-forget variant for callers that don't wait on the result.
    pub fn spawn(
        self: &Arc<Self>,
        guard: JobGuard,
    ) -> JoinHandle<Result<BackupRecord, BackupError>> {
        let service = self.clone();
        tokio::spawn(async move { service.run_with_guard(guard).await })
    }

    /// Removes a backup under the job lock, so a restore never reads a
    /// directory that is halfway deleted.
    pub fn delete(&self, id: &str) -> Result<BackupRecord, BackupError> {
        let _guard = self.lock.try_acquire(JobKind::DeleteBackup)?;
        self.store.delete(id)
    }

    async fn download(&self, id: &str) -> Result<BackupRecord, BackupError> {
        let config = self.config.snapshot();
        let target = self.store.root().join(id);
        info!("💾 Starting backup {} of {}", id, config.ftp.dir);

        self.engine
            .download_folder(&config.ftp.dir, &target, &config.ftp.blacklist)
            .await?;

        let record = match BackupRecord::load(self.store.root(), id) {
            Ok(record) => record,
            Err(e) => {
                warn!("Backup {} was downloaded but can't be listed: {}", id, e);
                return Err(e.into());
            }
        };
        self.store.register(record.clone());
        Ok(record)
    }
}
