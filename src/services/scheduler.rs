use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ConfigStore};
use crate::models::backup::BackupRecord;
use crate::services::backup_service::{BackupError, BackupService};
use crate::services::job_lock::{JobKind, JobLock};

const TICK: Duration = Duration::from_secs(1);

/// Wall-clock source in Unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Idle,
    JobRunning,
}

#[derive(Debug)]
pub enum TickOutcome {
    /// First tick with no recorded run: the interval starts now.
    Armed { last_run: i64 },
    Waiting { next_run: i64 },
    Launched(JoinHandle<Result<BackupRecord, BackupError>>),
    /// Due, but another job holds the lock. `last_run` is left alone so the
    /// next tick retries.
    Busy,
}

/// Launches one unattended backup per interval while enabled.
///
/// The due check compares wall-clock time against the persisted `last_run`,
/// so restarts don't reset the cadence. `last_run` only moves when a job is
/// launched, never when one finishes.
pub struct Scheduler {
    config: ConfigStore,
    service: Arc<BackupService>,
    lock: JobLock,
    clock: Arc<dyn Clock>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl Scheduler {
    pub fn new(
        config: ConfigStore,
        service: Arc<BackupService>,
        lock: JobLock,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            service,
            lock,
            clock,
            stop_tx: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if !self.is_started() {
            SchedulerState::Stopped
        } else if self.lock.current() == Some(JobKind::ScheduledBackup) {
            SchedulerState::JobRunning
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_started(&self) -> bool {
        self.slot().as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    /// Next launch time, if armed.
    pub fn next_run(&self) -> Option<i64> {
        let config = self.config.snapshot();
        config
            .last_run
            .map(|last| last + i64::from(config.interval) * 60)
    }

    /// Stopped → Idle. Does nothing if the loop is already running.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.slot();
        if slot.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false) {
            return;
        }

        let (tx, rx) = watch::channel(false);
        *slot = Some(tx);
        drop(slot);

        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.run(rx).await });
        info!(
            "⏰ Auto backup scheduler started (every {} min)",
            self.config.snapshot().interval
        );
    }

    /// Lets the loop exit on its next tick. An in-flight job keeps running.
    pub fn stop(&self) {
        if let Some(tx) = self.slot().take() {
            let _ = tx.send(true);
            info!("⏰ Auto backup scheduler stopped");
        }
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut ticker = time::interval(TICK);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick(self.clock.now()) {
                Ok(TickOutcome::Launched(_)) => {}
                Ok(TickOutcome::Armed { last_run }) => {
                    info!("Auto backup armed at {}", last_run);
                }
                Ok(TickOutcome::Busy) => debug!("Auto backup due but another job is running"),
                Ok(TickOutcome::Waiting { .. }) => {}
                Err(e) => error!("Scheduler tick failed: {}", e),
            }
        }

        debug!("Scheduler loop exited");
    }

    /// One pass of the control loop at time `now` (Unix seconds).
    pub fn tick(&self, now: i64) -> Result<TickOutcome, ConfigError> {
        let config = self.config.snapshot();

        let Some(last_run) = config.last_run else {
            self.config.update(|c| c.last_run = Some(now))?;
            return Ok(TickOutcome::Armed { last_run: now });
        };

        let next_run = last_run + i64::from(config.interval) * 60;
        if now < next_run {
            return Ok(TickOutcome::Waiting { next_run });
        }

        let guard = match self.lock.try_acquire(JobKind::ScheduledBackup) {
            Ok(guard) => guard,
            Err(_) => return Ok(TickOutcome::Busy),
        };

        // Persist before launching so a crash mid-job doesn't relaunch on restart.
        if let Err(e) = self.config.update(|c| c.last_run = Some(now)) {
            warn!("Couldn't record auto backup launch, skipping this run");
            return Err(e);
        }

        info!("⏰ Auto backup due (last run {}), launching", last_run);
        Ok(TickOutcome::Launched(self.service.spawn(guard)))
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<watch::Sender<bool>>> {
        match self.stop_tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
