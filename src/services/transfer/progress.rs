use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Byte accounting for one running transfer.
///
/// Written only by the worker doing the transfer; anyone may read it.
/// `cumulative` counts bytes as they pass through the transfer callback.
#[derive(Debug)]
pub struct TransferProgress {
    direction: Direction,
    started_at: DateTime<Utc>,
    total: AtomicU64,
    cumulative: AtomicU64,
    sized: AtomicBool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressReport {
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub total_size: Option<u64>,
    pub cumulative_size: u64,
    pub percentage: Option<f64>,
    pub finished: bool,
}

impl TransferProgress {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            started_at: Utc::now(),
            total: AtomicU64::new(0),
            cumulative: AtomicU64::new(0),
            sized: AtomicBool::new(false),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_total(&self, bytes: u64) {
        self.total.store(bytes, Ordering::Relaxed);
        self.sized.store(true, Ordering::Release);
    }

    pub fn add(&self, bytes: u64) {
        self.cumulative.fetch_add(bytes, Ordering::Relaxed);
    }

    /// `None` while the size walk is still running.
    pub fn total_size(&self) -> Option<u64> {
        if self.sized.load(Ordering::Acquire) {
            Some(self.total.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn cumulative_size(&self) -> u64 {
        self.cumulative.load(Ordering::Relaxed)
    }

    pub fn percentage(&self) -> Option<f64> {
        let total = self.total_size()?;
        if total == 0 {
            return Some(100.0);
        }
        Some(self.cumulative_size() as f64 / total as f64 * 100.0)
    }

    pub fn finished(&self) -> bool {
        self.total_size() == Some(self.cumulative_size())
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            direction: self.direction,
            started_at: self.started_at,
            total_size: self.total_size(),
            cumulative_size: self.cumulative_size(),
            percentage: self.percentage(),
            finished: self.finished(),
        }
    }
}

/// Holds the progress of the single transfer allowed per direction.
#[derive(Clone, Default)]
pub struct ProgressSlot(Arc<Mutex<Option<Arc<TransferProgress>>>>);

impl ProgressSlot {
    pub fn current(&self) -> Option<Arc<TransferProgress>> {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Installs a fresh progress object, failing if one is already active.
    pub fn claim(&self, direction: Direction) -> Result<ProgressClaim, TransferError> {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return Err(TransferError::Busy(direction));
        }
        let progress = Arc::new(TransferProgress::new(direction));
        *guard = Some(progress.clone());
        Ok(ProgressClaim {
            slot: self.clone(),
            progress,
        })
    }
}

/// Empties the slot when the transfer ends, however it ends.
pub struct ProgressClaim {
    slot: ProgressSlot,
    progress: Arc<TransferProgress>,
}

impl ProgressClaim {
    pub fn progress(&self) -> Arc<TransferProgress> {
        self.progress.clone()
    }
}

impl Drop for ProgressClaim {
    fn drop(&mut self) {
        let mut guard = match self.slot.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }
}
