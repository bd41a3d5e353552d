//! Worker pools, one per named queue.
//!
//! A pool keeps up to `concurrency` tasks running on a `JoinSet`, claiming
//! a new one as soon as a slot frees up. Delayed and expired deliveries are
//! swept on every poll tick. Every task runs under a
//! soft deadline (logged) and a hard deadline (aborted and handed to
//! [`TaskHandler::on_timeout`]). Tasks are acked after the handler returns;
//! a task whose worker panicked stays in flight and is redelivered once its
//! visibility deadline passes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::jobs::queue::{Delivery, JobQueue, QueueName, TaskEnvelope};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SOFT_TIMEOUT_SECS: u64 = 25 * 60;
pub const DEFAULT_HARD_TIMEOUT_SECS: u64 = 30 * 60;
/// Extra visibility beyond the hard deadline before a task is redelivered.
const VISIBILITY_GRACE: Duration = Duration::from_secs(60);

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Runs one task to completion. Failures are the handler's to record
    /// and retry; the pool only logs.
    async fn handle(&self, envelope: &TaskEnvelope);

    /// Called after a task was aborted at its hard deadline.
    async fn on_timeout(&self, envelope: &TaskEnvelope);
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue: QueueName,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub soft_timeout: Duration,
    pub hard_timeout: Duration,
}

impl WorkerConfig {
    pub fn new(queue: QueueName, concurrency: usize) -> Self {
        Self {
            queue,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            soft_timeout: Duration::from_secs(DEFAULT_SOFT_TIMEOUT_SECS),
            hard_timeout: Duration::from_secs(DEFAULT_HARD_TIMEOUT_SECS),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_timeout = soft.min(hard);
        self.hard_timeout = hard;
        self
    }

    fn visibility(&self) -> Duration {
        self.hard_timeout + VISIBILITY_GRACE
    }
}

/// Handle for a running pool.
pub struct WorkerHandle {
    queue: QueueName,
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stops claiming new tasks and waits for the in-flight ones to finish.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).await.is_err() {
            debug!(queue = %self.queue, "Worker pool already stopped");
        }
        if let Err(e) = self.join.await {
            error!(queue = %self.queue, error = ?e, "Worker pool task failed");
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn TaskHandler>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn TaskHandler>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let queue = self.config.queue;
        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        WorkerHandle {
            queue,
            shutdown_tx,
            join,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        let queue_name = self.config.queue;
        info!(
            queue = %queue_name,
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Worker pool started"
        );

        let mut tasks = JoinSet::new();
        let mut tick = interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Top up free slots; a long task never holds the others idle.
            while tasks.len() < self.config.concurrency {
                match self.queue.dequeue(queue_name, self.config.visibility()).await {
                    Ok(Some(delivery)) => {
                        let queue = self.queue.clone();
                        let handler = self.handler.clone();
                        let config = self.config.clone();
                        tasks.spawn(async move {
                            execute(queue, handler, &config, delivery).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(queue = %queue_name, error = ?e, "Failed to dequeue task");
                        break;
                    }
                }
            }

            tokio::select! {
                Some(()) = shutdown_rx.recv() => {
                    info!(queue = %queue_name, "Worker pool received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(queue_name, result);
                }
                _ = tick.tick() => {
                    self.housekeeping().await;
                }
            }
        }

        if !tasks.is_empty() {
            debug!(queue = %queue_name, running = tasks.len(), "Waiting for in-flight tasks");
        }
        while let Some(result) = tasks.join_next().await {
            log_join(queue_name, result);
        }
        info!(queue = %queue_name, "Worker pool stopped");
    }

    async fn housekeeping(&self) {
        let queue = self.config.queue;
        match self.queue.promote_due(queue).await {
            Ok(0) => {}
            Ok(n) => debug!(queue = %queue, promoted = n, "Promoted delayed tasks"),
            Err(e) => warn!(queue = %queue, error = ?e, "Failed to promote delayed tasks"),
        }
        if let Err(e) = self.queue.requeue_expired(queue).await {
            warn!(queue = %queue, error = ?e, "Failed to requeue expired tasks");
        }
    }
}

fn log_join(queue: QueueName, result: Result<(), JoinError>) {
    if let Err(e) = result {
        // Not acked: the task is redelivered after its visibility deadline.
        error!(queue = %queue, error = ?e, "Task panicked");
    }
}

async fn execute(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn TaskHandler>,
    config: &WorkerConfig,
    delivery: Delivery,
) {
    let envelope = &delivery.envelope;
    let start = Instant::now();
    debug!(
        task_id = %envelope.id,
        task = envelope.task.name(),
        attempt = envelope.attempt,
        "Running task"
    );

    // Scoped so an aborted handler future is dropped before `on_timeout`.
    let finished = {
        let work = handler.handle(envelope);
        tokio::pin!(work);
        let soft = sleep(config.soft_timeout);
        tokio::pin!(soft);
        let hard = sleep(config.hard_timeout);
        tokio::pin!(hard);

        let mut warned = false;
        loop {
            tokio::select! {
                _ = &mut work => break true,
                _ = &mut soft, if !warned => {
                    warned = true;
                    warn!(
                        task_id = %envelope.id,
                        task = envelope.task.name(),
                        soft_timeout_secs = config.soft_timeout.as_secs(),
                        "Task exceeded its soft time limit"
                    );
                }
                _ = &mut hard => break false,
            }
        }
    };

    if finished {
        debug!(
            task_id = %envelope.id,
            task = envelope.task.name(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Task finished"
        );
    } else {
        error!(
            task_id = %envelope.id,
            task = envelope.task.name(),
            hard_timeout_secs = config.hard_timeout.as_secs(),
            "Task aborted at its hard time limit"
        );
        handler.on_timeout(envelope).await;
    }

    if let Err(e) = queue.ack(&delivery).await {
        warn!(task_id = %envelope.id, error = ?e, "Failed to ack task");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
