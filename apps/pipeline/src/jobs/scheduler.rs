//! Periodic task producer.
//!
//! Enqueues drive syncs (one per configured folder), the match refresh and
//! job cleanup on fixed intervals. Drive sync fires once at startup; the
//! other two wait one full period first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::DriveFolder;
use crate::jobs::queue::{JobQueue, TaskEnvelope, TaskKind};

const DRIVE_SYNC_PRIORITY: u8 = 3;
const REFRESH_PRIORITY: u8 = 2;
const CLEANUP_PRIORITY: u8 = 1;

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub drive_folders: Vec<DriveFolder>,
    pub drive_sync_interval: Duration,
    pub match_refresh_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            drive_folders: Vec::new(),
            drive_sync_interval: Duration::from_secs(60 * 60),
            match_refresh_interval: Duration::from_secs(6 * 60 * 60),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = ?e, "Scheduler task failed");
        }
    }
}

pub struct Scheduler {
    queue: Arc<dyn JobQueue>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(queue: Arc<dyn JobQueue>, config: ScheduleConfig) -> Self {
        Self { queue, config }
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        SchedulerHandle { shutdown_tx, join }
    }

    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let cfg = &self.config;
        let mut drive = interval(cfg.drive_sync_interval);
        let mut refresh = interval_at(
            Instant::now() + cfg.match_refresh_interval,
            cfg.match_refresh_interval,
        );
        let mut cleanup = interval_at(Instant::now() + cfg.cleanup_interval, cfg.cleanup_interval);
        for timer in [&mut drive, &mut refresh, &mut cleanup] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }
        let has_folders = !cfg.drive_folders.is_empty();

        info!(
            drive_folders = cfg.drive_folders.len(),
            drive_sync_secs = cfg.drive_sync_interval.as_secs(),
            match_refresh_secs = cfg.match_refresh_interval.as_secs(),
            cleanup_secs = cfg.cleanup_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = drive.tick(), if has_folders => {
                    for folder in &cfg.drive_folders {
                        self.enqueue(TaskKind::SyncDrive {
                            folder_id: folder.folder_id.clone(),
                            owner_id: folder.owner_id,
                        }, DRIVE_SYNC_PRIORITY).await;
                    }
                }
                _ = refresh.tick() => self.enqueue(TaskKind::RefreshMatches, REFRESH_PRIORITY).await,
                _ = cleanup.tick() => self.enqueue(TaskKind::CleanupJobs, CLEANUP_PRIORITY).await,
            }
        }
        info!("Scheduler stopped");
    }

    async fn enqueue(&self, task: TaskKind, priority: u8) {
        let envelope = TaskEnvelope::new(task, priority);
        match self.queue.enqueue(&envelope).await {
            Ok(()) => debug!(task = envelope.task.name(), "Scheduled task enqueued"),
            Err(e) => error!(task = envelope.task.name(), error = ?e, "Failed to enqueue scheduled task"),
        }
    }
}
