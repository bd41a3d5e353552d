//! Redis-backed task queues.
//!
//! Each named queue owns three sorted sets:
//!
//! - `ready`: runnable tasks, scored so that higher priority pops first and
//!   equal priorities pop in enqueue order
//! - `delayed`: retries waiting for their backoff, scored by due time
//! - `inflight`: tasks handed to a worker, scored by visibility deadline
//!
//! A task leaves `inflight` only when the worker acks it after the handler
//! returns. Tasks whose deadline passes (crashed or wedged worker) are put
//! back on `ready` by [`JobQueue::requeue_expired`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

const KEY_PREFIX: &str = "pipeline:queue";
/// Upper bound on entries moved per promote / requeue call.
const MOVE_BATCH: isize = 100;
/// Keeps the priority band wider than any millisecond timestamp.
const PRIORITY_BAND: f64 = 1e13;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

// ────────────────────────────────────────────────────────────────────────────
// Task model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    ResumeProcessing,
    Matching,
    DriveSync,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::ResumeProcessing,
        QueueName::Matching,
        QueueName::DriveSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::ResumeProcessing => "resume-processing",
            QueueName::Matching => "matching",
            QueueName::DriveSync => "drive-sync",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "kebab-case")]
pub enum TaskKind {
    ProcessResume { resume_id: Uuid },
    MatchCandidateToJobs { resume_id: Uuid },
    MatchJobToCandidates { job_id: Uuid },
    StoreEmbedding { resume_id: Uuid },
    SyncDrive { folder_id: String, owner_id: Uuid },
    RefreshMatches,
    CleanupJobs,
}

impl TaskKind {
    pub fn queue(&self) -> QueueName {
        match self {
            TaskKind::ProcessResume { .. } => QueueName::ResumeProcessing,
            TaskKind::SyncDrive { .. } => QueueName::DriveSync,
            TaskKind::MatchCandidateToJobs { .. }
            | TaskKind::MatchJobToCandidates { .. }
            | TaskKind::StoreEmbedding { .. }
            | TaskKind::RefreshMatches
            | TaskKind::CleanupJobs => QueueName::Matching,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::ProcessResume { .. } => "process-resume",
            TaskKind::MatchCandidateToJobs { .. } => "match-candidate-to-jobs",
            TaskKind::MatchJobToCandidates { .. } => "match-job-to-candidates",
            TaskKind::StoreEmbedding { .. } => "store-embedding",
            TaskKind::SyncDrive { .. } => "sync-drive",
            TaskKind::RefreshMatches => "refresh-matches",
            TaskKind::CleanupJobs => "cleanup-jobs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    /// Stable across retries of the same task.
    pub id: Uuid,
    /// 1–10, higher first.
    pub priority: u8,
    /// 0 for the first delivery, bumped by [`TaskEnvelope::retry`].
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub task: TaskKind,
}

impl TaskEnvelope {
    pub fn new(task: TaskKind, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
            attempt: 0,
            enqueued_at: Utc::now(),
            task,
        }
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn queue(&self) -> QueueName {
        self.task.queue()
    }

    fn ready_score(&self) -> f64 {
        let band = f64::from(MAX_PRIORITY - self.priority.clamp(MIN_PRIORITY, MAX_PRIORITY));
        band * PRIORITY_BAND + self.enqueued_at.timestamp_millis() as f64
    }
}

/// A dequeued task plus the exact payload needed to ack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub queue: QueueName,
    raw: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Trait
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> QueueResult<()>;

    /// Parks the task until `delay` has elapsed; [`JobQueue::promote_due`]
    /// makes it runnable.
    async fn enqueue_delayed(&self, envelope: &TaskEnvelope, delay: Duration) -> QueueResult<()>;

    /// Pops the best ready task and marks it in flight until `visibility`
    /// elapses.
    async fn dequeue(&self, queue: QueueName, visibility: Duration) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Moves due delayed tasks to `ready`; returns how many moved.
    async fn promote_due(&self, queue: QueueName) -> QueueResult<usize>;

    /// Moves in-flight tasks past their deadline back to `ready`.
    async fn requeue_expired(&self, queue: QueueName) -> QueueResult<usize>;
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

// ZPOPMIN + ZADD must be atomic or a crash between them loses the task.
const DEQUEUE_SCRIPT: &str = r#"
local item = redis.call('ZPOPMIN', KEYS[1])
if item[1] == nil then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[1], item[1])
return item[1]
"#;

fn key(queue: QueueName, set: &str) -> String {
    format!("{KEY_PREFIX}:{}:{set}", queue.as_str())
}

fn deadline_ms(after: Duration) -> f64 {
    let after = chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() + after).timestamp_millis() as f64
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    dequeue_script: redis::Script,
}

impl RedisJobQueue {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            dequeue_script: redis::Script::new(DEQUEUE_SCRIPT),
        }
    }

    /// Moves members scored at or below now from `from` to `ready`. Only the
    /// caller whose ZREM succeeds re-adds a member, so concurrent movers never
    /// duplicate a task.
    async fn move_due(&self, queue: QueueName, from: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let source = key(queue, from);
        let now = Utc::now().timestamp_millis() as f64;
        let due: Vec<String> = conn
            .zrangebyscore_limit(&source, "-inf", now, 0, MOVE_BATCH)
            .await?;

        let mut moved = 0;
        for raw in due {
            let removed: i64 = conn.zrem(&source, &raw).await?;
            if removed != 1 {
                continue;
            }
            match serde_json::from_str::<TaskEnvelope>(&raw) {
                Ok(envelope) => {
                    conn.zadd::<_, _, _, ()>(key(queue, "ready"), &raw, envelope.ready_score())
                        .await?;
                    moved += 1;
                }
                Err(e) => warn!(queue = %queue, "Dropping undecodable task: {e}"),
            }
        }
        Ok(moved)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, envelope: &TaskEnvelope) -> QueueResult<()> {
        let raw = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key(envelope.queue(), "ready"), raw, envelope.ready_score())
            .await?;
        debug!(
            task_id = %envelope.id,
            task = envelope.task.name(),
            priority = envelope.priority,
            "Enqueued task"
        );
        Ok(())
    }

    async fn enqueue_delayed(&self, envelope: &TaskEnvelope, delay: Duration) -> QueueResult<()> {
        let raw = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key(envelope.queue(), "delayed"), raw, deadline_ms(delay))
            .await?;
        debug!(
            task_id = %envelope.id,
            task = envelope.task.name(),
            delay_secs = delay.as_secs(),
            "Scheduled delayed task"
        );
        Ok(())
    }

    async fn dequeue(&self, queue: QueueName, visibility: Duration) -> QueueResult<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = self
            .dequeue_script
            .key(key(queue, "ready"))
            .key(key(queue, "inflight"))
            .arg(deadline_ms(visibility))
            .invoke_async(&mut conn)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<TaskEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(Delivery {
                envelope,
                queue,
                raw,
            })),
            Err(e) => {
                warn!(queue = %queue, "Dropping undecodable task: {e}");
                conn.zrem::<_, _, ()>(key(queue, "inflight"), &raw).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(key(delivery.queue, "inflight"), &delivery.raw)
            .await?;
        Ok(())
    }

    async fn promote_due(&self, queue: QueueName) -> QueueResult<usize> {
        self.move_due(queue, "delayed").await
    }

    async fn requeue_expired(&self, queue: QueueName) -> QueueResult<usize> {
        let moved = self.move_due(queue, "inflight").await?;
        if moved > 0 {
            warn!(queue = %queue, moved, "Redelivering tasks past their visibility deadline");
        }
        Ok(moved)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (tests)
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub use memory::MemoryQueue;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tasks_route_to_named_queues() {
        assert_eq!(
            TaskKind::ProcessResume { resume_id: Uuid::nil() }.queue().as_str(),
            "resume-processing"
        );
        assert_eq!(
            TaskKind::StoreEmbedding { resume_id: Uuid::nil() }.queue().as_str(),
            "matching"
        );
        assert_eq!(
            TaskKind::SyncDrive {
                folder_id: "f".into(),
                owner_id: Uuid::nil()
            }
            .queue()
            .as_str(),
            "drive-sync"
        );
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = TaskEnvelope::new(TaskKind::MatchJobToCandidates { job_id: Uuid::nil() }, 6);
        let v = serde_json::to_value(&envelope).unwrap();
        assert_eq!(v["task"]["task"], "match-job-to-candidates");
        assert_eq!(v["priority"], 6);
        let back: TaskEnvelope = serde_json::from_value(v).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_priority_clamped() {
        assert_eq!(TaskEnvelope::new(TaskKind::RefreshMatches, 0).priority, 1);
        assert_eq!(TaskEnvelope::new(TaskKind::RefreshMatches, 42).priority, 10);
    }

    #[test]
    fn test_higher_priority_scores_lower() {
        let low = TaskEnvelope::new(TaskKind::CleanupJobs, 3);
        let mut high = TaskEnvelope::new(TaskKind::CleanupJobs, 5);
        high.enqueued_at = low.enqueued_at + chrono::Duration::hours(1);
        assert!(high.ready_score() < low.ready_score());

        let mut later = low.clone();
        later.enqueued_at = low.enqueued_at + chrono::Duration::seconds(1);
        assert!(low.ready_score() < later.ready_score());
    }

    #[test]
    fn test_retry_keeps_id_and_bumps_attempt() {
        let first = TaskEnvelope::new(TaskKind::RefreshMatches, 5);
        let second = first.retry();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt, 1);
    }

    #[tokio::test]
    async fn test_memory_queue_pops_by_priority_then_age() {
        let q = MemoryQueue::new();
        let a = TaskEnvelope::new(TaskKind::ProcessResume { resume_id: Uuid::new_v4() }, 3);
        let b = TaskEnvelope::new(TaskKind::ProcessResume { resume_id: Uuid::new_v4() }, 5);
        let mut c = TaskEnvelope::new(TaskKind::ProcessResume { resume_id: Uuid::new_v4() }, 5);
        c.enqueued_at = b.enqueued_at + chrono::Duration::seconds(1);
        for e in [&a, &c, &b] {
            q.enqueue(e).await.unwrap();
        }

        let order: Vec<Uuid> = {
            let mut out = Vec::new();
            while let Some(d) = q
                .dequeue(QueueName::ResumeProcessing, Duration::from_secs(60))
                .await
                .unwrap()
            {
                out.push(d.envelope.id);
                q.ack(&d).await.unwrap();
            }
            out
        };
        assert_eq!(order, vec![b.id, c.id, a.id]);
        assert_eq!(q.acked(QueueName::ResumeProcessing).len(), 3);
    }
}
