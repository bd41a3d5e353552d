use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::UnknownVariant;

/// Lifecycle of a queue envelope. Batches and drive syncs reuse it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownVariant::new("job_status", other)),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Queue envelope for one resume record (1:1).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub task_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    /// 1–10, higher runs first.
    pub priority: i16,
    /// Progress of the current attempt, reset to 0 on retry.
    pub progress: i32,
    /// Highest progress ever published for this resume.
    pub published_progress: i32,
    pub current_step: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessingJob {
    pub resume_id: Uuid,
    pub task_id: Uuid,
    pub priority: i16,
    pub max_retries: i32,
}

/// Outcome of a progress write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// True when the value raised the published high-water mark and should
    /// be emitted to subscribers.
    pub publish: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BulkBatch {
    pub id: Uuid,
    pub uploader_id: Uuid,
    pub total_files: i32,
    pub successful_files: i32,
    pub failed_files: i32,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkBatch {
    pub fn processed(&self) -> i32 {
        self.successful_files + self.failed_files
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DriveSync {
    pub id: Uuid,
    pub folder_id: String,
    pub owner_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub files_found: i32,
    pub files_ingested: i32,
    pub files_skipped: i32,
    pub files_failed: i32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-sync counters reported when a drive sync finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriveSyncCounts {
    pub files_found: i32,
    pub files_ingested: i32,
    pub files_skipped: i32,
    pub files_failed: i32,
}
