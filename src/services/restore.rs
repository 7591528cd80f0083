use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{error, info};

use crate::config::ConfigStore;
use crate::models::backup::BackupRecord;
use crate::services::backup_service::BackupStore;
use crate::services::job_lock::{BusyError, JobGuard, JobKind, JobLock};
use crate::services::server_api::{LifecycleCommand, ServerApi, ServerError};
use crate::services::status_poller::{StatusHandle, WaitError};
use crate::services::transfer::{TransferEngine, TransferError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreStage {
    StopServer,
    Upload,
    StartServer,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreStatus {
    pub backup_id: String,
    pub stage: RestoreStage,
    /// Every stage entered so far, in order.
    pub history: Vec<RestoreStage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RestoreStatus {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error(transparent)]
    Busy(#[from] BusyError),
    #[error("backup {0} not found")]
    NotFound(String),
    #[error("lifecycle command failed: {0}")]
    Server(#[from] ServerError),
    #[error("hosting API refused {command} with HTTP {status}")]
    CommandRejected {
        command: LifecycleCommand,
        status: u16,
    },
    #[error("upload failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("server did not reach running={expected} within {}s", .waited.as_secs())]
    Timeout { expected: bool, waited: Duration },
    #[error("status poller has stopped")]
    PollerStopped,
}

impl From<WaitError> for RestoreError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { expected, waited } => RestoreError::Timeout { expected, waited },
            WaitError::Closed => RestoreError::PollerStopped,
        }
    }
}

/// Puts a backup back onto the game server: stop, upload, start.
///
/// Runs under the job lock, so no backup reads the save directory while it
/// is being overwritten. Not resumable; a failure leaves the server in
/// whatever state the failing stage reached.
pub struct RestoreOrchestrator {
    engine: Arc<TransferEngine>,
    store: Arc<BackupStore>,
    lock: JobLock,
    server: ServerApi,
    status: StatusHandle,
    config: ConfigStore,
    tx: watch::Sender<Option<RestoreStatus>>,
}

impl RestoreOrchestrator {
    pub fn new(
        engine: Arc<TransferEngine>,
        store: Arc<BackupStore>,
        lock: JobLock,
        server: ServerApi,
        status: StatusHandle,
        config: ConfigStore,
    ) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            engine,
            store,
            lock,
            server,
            status,
            config,
            tx,
        }
    }

    /// The running restore, or the last one to finish.
    pub fn current(&self) -> Option<RestoreStatus> {
        self.tx.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Option<RestoreStatus>> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub async fn restore(&self, backup_id: &str) -> Result<(), RestoreError> {
        let (guard, record) = self.prepare(backup_id)?;
        self.run(guard, record).await
    }

    /// Validates and locks synchronously, then runs the stages in the background.
    pub fn spawn(
        self: &Arc<Self>,
        backup_id: &str,
    ) -> Result<JoinHandle<Result<(), RestoreError>>, RestoreError> {
        let (guard, record) = self.prepare(backup_id)?;
        let orchestrator = self.clone();
        Ok(tokio::spawn(async move {
            orchestrator.run(guard, record).await
        }))
    }

    /// Locks before the lookup, so a deletion can't slip in between.
    fn prepare(&self, backup_id: &str) -> Result<(JobGuard, BackupRecord), RestoreError> {
        let guard = self.lock.try_acquire(JobKind::Restore)?;
        let record = self
            .store
            .get(backup_id)
            .ok_or_else(|| RestoreError::NotFound(backup_id.to_string()))?;
        Ok((guard, record))
    }

    async fn run(&self, guard: JobGuard, record: BackupRecord) -> Result<(), RestoreError> {
        info!("♻️  Restoring backup {} ({})", record.id, record.name);
        self.tx.send_replace(Some(RestoreStatus {
            backup_id: record.id.clone(),
            stage: RestoreStage::StopServer,
            history: vec![RestoreStage::StopServer],
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }));

        let result = self.stages(&record).await;
        drop(guard);

        self.tx.send_modify(|status| {
            if let Some(status) = status {
                status.finished_at = Some(Utc::now());
                status.error = result.as_ref().err().map(|e| e.to_string());
            }
        });

        match &result {
            Ok(()) => info!("✅ Backup {} restored", record.id),
            Err(e) => error!("❌ Restore of {} failed: {}", record.id, e),
        }
        result
    }

    async fn stages(&self, record: &BackupRecord) -> Result<(), RestoreError> {
        let config = self.config.snapshot();
        let timeout = config.restore.state_timeout();

        accepted(LifecycleCommand::Stop, self.server.stop().await?)?;
        self.status.wait_for_running(false, timeout).await?;
        time::sleep(config.restore.settle_delay()).await;
        // The flag may have flipped back during the settle delay.
        self.status.wait_for_running(false, timeout).await?;

        self.enter(RestoreStage::Upload);
        self.engine
            .upload_folder(&record.path, &config.ftp.dir)
            .await?;

        self.enter(RestoreStage::StartServer);
        accepted(LifecycleCommand::Start, self.server.start().await?)?;
        self.status.wait_for_running(true, timeout).await?;

        self.enter(RestoreStage::Done);
        Ok(())
    }

    fn enter(&self, stage: RestoreStage) {
        info!("Restore stage: {:?}", stage);
        self.tx.send_modify(|status| {
            if let Some(status) = status {
                status.stage = stage;
                status.history.push(stage);
            }
        });
    }
}

/// A refused command would otherwise surface only as a state timeout.
fn accepted(command: LifecycleCommand, status: u16) -> Result<(), RestoreError> {
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(RestoreError::CommandRejected { command, status })
    }
}
