use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::server_api::{ServerApi, ServerError};
use crate::models::status::ServerStatus;

/// Latest successful status, `None` until the first poll succeeds.
pub type Snapshot = Option<Arc<ServerStatus>>;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("server did not reach running={expected} within {}s", .waited.as_secs())]
    Timeout { expected: bool, waited: Duration },
    #[error("status poller has stopped")]
    Closed,
}

/// Read side of the poller. Cheap to clone, never blocks the poller.
#[derive(Clone)]
pub struct StatusHandle {
    rx: watch::Receiver<Snapshot>,
}

impl StatusHandle {
    pub fn latest(&self) -> Snapshot {
        self.rx.borrow().clone()
    }

    pub fn is_running(&self) -> Option<bool> {
        self.rx.borrow().as_ref().and_then(|s| s.running)
    }

    /// Resolves once a snapshot reports `running == expected`.
    ///
    /// An unknown running flag never satisfies the wait.
    pub async fn wait_for_running(
        &self,
        expected: bool,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let mut rx = self.rx.clone();
        let wait = async move {
            loop {
                let reached = rx
                    .borrow_and_update()
                    .as_ref()
                    .and_then(|s| s.running)
                    == Some(expected);
                if reached {
                    return Ok::<(), WaitError>(());
                }
                rx.changed().await.map_err(|_| WaitError::Closed)?;
            }
        };

        time::timeout(timeout, wait)
            .await
            .map_err(|_| WaitError::Timeout {
                expected,
                waited: timeout,
            })?
    }
}

/// Periodically fetches the merged status and publishes it.
///
/// A failed fetch keeps the previous snapshot; failures are logged once per
/// streak so a host outage doesn't flood the log.
pub struct StatusPoller {
    api: ServerApi,
    tx: watch::Sender<Snapshot>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(api: ServerApi, interval: Duration) -> (Self, StatusHandle) {
        let (tx, rx) = watch::channel(None);
        (Self { api, tx, interval }, StatusHandle { rx })
    }

    /// One fetch. On success the snapshot is replaced wholesale.
    pub async fn poll_once(&self) -> Result<(), ServerError> {
        let status = self.api.fetch_status().await?;
        self.tx.send_replace(Some(Arc::new(status)));
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now(), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        info!("📡 Status poller running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.poll_once().await {
                Ok(()) => {
                    if failures > 0 {
                        info!("Status poll recovered after {} failed attempts", failures);
                    }
                    failures = 0;
                }
                Err(e) => {
                    if failures == 0 {
                        warn!("Status poll failed: {}", e);
                    } else {
                        debug!("Status poll still failing: {}", e);
                    }
                    failures = failures.saturating_add(1);
                }
            }
        }

        info!("Status poller stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
