pub mod ftp;
pub mod mirror;
pub mod progress;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use mirror::TransferSummary;
pub use progress::{Direction, ProgressReport, TransferProgress};
use progress::ProgressSlot;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("couldn't connect to {address}: {message}")]
    Connect { address: String, message: String },
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("server rejected {path}: {message}")]
    Rejected { path: String, message: String },
    #[error("a {0} is already in progress")]
    Busy(Direction),
    #[error("I/O failed on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transfer task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// One authenticated session on the remote filesystem.
///
/// Implementations are blocking; the engine drives them from the blocking pool.
/// `on_chunk` receives the size of every chunk as it crosses the wire.
pub trait RemoteFs: Send {
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, TransferError>;

    fn download(
        &mut self,
        path: &str,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError>;

    fn upload(
        &mut self,
        path: &str,
        source: &mut dyn Read,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError>;

    /// Fails with `Rejected` when the directory already exists.
    fn mkdir(&mut self, path: &str) -> Result<(), TransferError>;
}

pub trait RemoteConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn RemoteFs>, TransferError>;
}

/// Mirrors directory trees between the game server's FTP and local disk.
///
/// At most one download and one upload run at a time. Each opens its own
/// session, so a download and an upload may overlap.
pub struct TransferEngine {
    connector: Arc<dyn RemoteConnector>,
    downloads: ProgressSlot,
    uploads: ProgressSlot,
}

impl TransferEngine {
    pub fn new(connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            connector,
            downloads: ProgressSlot::default(),
            uploads: ProgressSlot::default(),
        }
    }

    pub fn download_progress(&self) -> Option<Arc<TransferProgress>> {
        self.downloads.current()
    }

    pub fn upload_progress(&self) -> Option<Arc<TransferProgress>> {
        self.uploads.current()
    }

    /// Total bytes of non-blacklisted files under `remote_path`.
    pub async fn folder_size(
        &self,
        remote_path: &str,
        blacklist: &[String],
    ) -> Result<u64, TransferError> {
        let connector = self.connector.clone();
        let remote_path = remote_path.to_string();
        let blacklist = blacklist.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut remote = connector.connect()?;
            mirror::folder_size(remote.as_mut(), &remote_path, &blacklist)
        })
        .await
        .map_err(|e| TransferError::Aborted(e.to_string()))?
    }

    pub async fn download_folder(
        &self,
        remote_path: &str,
        local_path: &Path,
        blacklist: &[String],
    ) -> Result<TransferSummary, TransferError> {
        let claim = self.downloads.claim(Direction::Download)?;
        let connector = self.connector.clone();
        let remote_path = remote_path.to_string();
        let local_path: PathBuf = local_path.to_path_buf();
        let blacklist = blacklist.to_vec();

        info!(
            "⬇️  Downloading {} into {}",
            remote_path,
            local_path.display()
        );

        tokio::task::spawn_blocking(move || {
            // The slot stays claimed until the blocking work is really over.
            let progress = claim.progress();
            let mut remote = connector.connect()?;
            let result = mirror::download_folder(
                remote.as_mut(),
                &remote_path,
                &local_path,
                &blacklist,
                &progress,
            );
            drop(claim);
            result
        })
        .await
        .map_err(|e| TransferError::Aborted(e.to_string()))?
    }

    pub async fn upload_folder(
        &self,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<TransferSummary, TransferError> {
        let claim = self.uploads.claim(Direction::Upload)?;
        let connector = self.connector.clone();
        let remote_path = remote_path.to_string();
        let local_path: PathBuf = local_path.to_path_buf();

        info!(
            "⬆️  Uploading {} to {}",
            local_path.display(),
            remote_path
        );

        tokio::task::spawn_blocking(move || {
            let progress = claim.progress();
            let mut remote = connector.connect()?;
            let result =
                mirror::upload_folder(remote.as_mut(), &local_path, &remote_path, &progress);
            drop(claim);
            result
        })
        .await
        .map_err(|e| TransferError::Aborted(e.to_string()))?
    }
}
