//! Background poll loop: one task, stoppable, with a tunable interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::desk::Desk;
use crate::error::Result;
use crate::settings::{DeskSettings, keys};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
pub const MIN_INTERVAL_MINUTES: u64 = 1;
pub const MAX_INTERVAL_MINUTES: u64 = 60;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn clamp_interval(minutes: u64) -> u64 {
    minutes.clamp(MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_minutes: u64,
    pub last_run: Option<DateTime<Utc>>,
}

struct RunningTask {
    handle: JoinHandle<()>,
    stop: Arc<Notify>,
}

pub struct Scheduler {
    desk: Arc<Desk>,
    interval_minutes: Arc<AtomicU64>,
    last_run: Arc<RwLock<Option<DateTime<Utc>>>>,
    task: Mutex<Option<RunningTask>>,
}

impl Scheduler {
    pub fn new(desk: Arc<Desk>, interval_minutes: u64) -> Self {
        Self {
            desk,
            interval_minutes: Arc::new(AtomicU64::new(clamp_interval(interval_minutes))),
            last_run: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Apply stored settings over the environment defaults and start the
    /// loop if it should be running.
    pub async fn resume(&self, env_enabled: bool, env_interval: u64) -> Result<SchedulerStatus> {
        let stored = DeskSettings::load(self.desk.db()).await?;
        let interval = clamp_interval(stored.scheduler_interval_minutes.unwrap_or(env_interval));
        self.interval_minutes.store(interval, Ordering::Relaxed);
        if stored.scheduler_enabled.unwrap_or(env_enabled) {
            self.spawn_loop().await;
        }
        Ok(self.status().await)
    }

    /// Start polling, restarting if already running. The choice is persisted.
    pub async fn start(&self, interval_minutes: Option<u64>) -> Result<SchedulerStatus> {
        if let Some(m) = interval_minutes {
            self.interval_minutes.store(clamp_interval(m), Ordering::Relaxed);
        }
        self.halt().await;
        self.spawn_loop().await;
        self.persist(true).await?;
        Ok(self.status().await)
    }

    pub async fn stop(&self) -> Result<SchedulerStatus> {
        self.halt().await;
        self.persist(false).await?;
        Ok(self.status().await)
    }

    /// Halt the loop on process exit, leaving the stored choice intact.
    pub async fn shutdown(&self) {
        self.halt().await;
    }

    /// Takes effect after the current wait.
    pub async fn set_interval(&self, minutes: u64) -> Result<SchedulerStatus> {
        let minutes = clamp_interval(minutes);
        self.interval_minutes.store(minutes, Ordering::Relaxed);
        self.desk
            .db()
            .set_setting(keys::SCHEDULER_INTERVAL_MINUTES, &minutes.to_string())
            .await?;
        info!(minutes, "Scheduler interval updated");
        Ok(self.status().await)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished());
        SchedulerStatus {
            running,
            interval_minutes: self.interval_minutes.load(Ordering::Relaxed),
            last_run: *self.last_run.read().await,
        }
    }

    async fn persist(&self, enabled: bool) -> Result<()> {
        let db = self.desk.db();
        db.set_setting(keys::SCHEDULER_ENABLED, if enabled { "true" } else { "false" })
            .await?;
        db.set_setting(
            keys::SCHEDULER_INTERVAL_MINUTES,
            &self.interval_minutes.load(Ordering::Relaxed).to_string(),
        )
        .await?;
        Ok(())
    }

    async fn spawn_loop(&self) {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let stop = Arc::new(Notify::new());
        let desk = Arc::clone(&self.desk);
        let interval = Arc::clone(&self.interval_minutes);
        let last_run = Arc::clone(&self.last_run);
        let stop_signal = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            info!(
                minutes = interval.load(Ordering::Relaxed),
                "Scheduler started"
            );
            loop {
                desk.run_cycle().await;
                *last_run.write().await = Some(Utc::now());

                let wait = Duration::from_secs(interval.load(Ordering::Relaxed) * 60);
                tokio::select! {
                    _ = stop_signal.notified() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            info!("Scheduler loop ended");
        });
        *slot = Some(RunningTask { handle, stop });
    }

    /// Signal the loop and wait briefly. A cycle in flight finishes on its own.
    async fn halt(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        // A stored permit covers a stop requested mid-cycle.
        task.stop.notify_one();
        if tokio::time::timeout(STOP_TIMEOUT, task.handle).await.is_err() {
            warn!("Scheduler did not stop within timeout; it will exit after the current cycle");
        }
    }
}
