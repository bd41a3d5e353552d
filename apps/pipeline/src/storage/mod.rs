//! Persistence seams for the pipeline.
//!
//! Every component talks to storage through the repository traits below so
//! the job runner, the ingestion sources and the tests share one code path.
//! `PgStore` implements all of them against PostgreSQL; the in-memory
//! implementation in `memory.rs` exists only for tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::job::{
    BulkBatch, DriveSync, DriveSyncCounts, JobStatus, NewProcessingJob, ProcessingJob,
    ProgressUpdate,
};
use crate::models::learning::{FeedbackRecord, FineTuneRun, NewFeedback, TrainingExample};
use crate::models::matching::{
    CandidateMatch, CandidateProfile, CandidateUpsert, JobPosting, NewCandidateMatch,
};
use crate::models::resume::{NewResumeFile, NewResumeRecord, ResumeFile, ResumeRecord};
use crate::models::resume_data::ResumeData;

pub mod blob;
#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use blob::{BlobStore, S3BlobStore};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blob storage error: {0}")]
    Blob(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ────────────────────────────────────────────────────────────────────────────
// Resume files, records and structured data
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait ResumeRepository: Send + Sync {
    /// Inserts a file row, or returns the existing row when the same uploader
    /// already stored identical bytes.
    async fn insert_file(&self, file: NewResumeFile) -> StoreResult<ResumeFile>;

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<ResumeFile>>;

    async fn insert_record(&self, record: NewResumeRecord) -> StoreResult<ResumeRecord>;

    async fn get_record(&self, id: Uuid) -> StoreResult<Option<ResumeRecord>>;

    /// True when a record already exists for this remote drive file.
    async fn drive_file_ingested(&self, drive_file_id: &str) -> StoreResult<bool>;

    /// Moves a non-terminal record to `processing` and bumps its attempt
    /// counter. Returns false when the record is already terminal.
    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool>;

    /// Overwrites the structured record for a resume (1:1, upsert).
    async fn upsert_resume_data(&self, resume_id: Uuid, data: &ResumeData) -> StoreResult<()>;

    async fn get_resume_data(&self, resume_id: Uuid) -> StoreResult<Option<ResumeData>>;

    async fn set_candidate(&self, resume_id: Uuid, candidate_id: Uuid) -> StoreResult<()>;

    /// `processing → completed`. Returns true only for the call that made the
    /// transition.
    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> StoreResult<bool>;

    /// `* → failed`, removing any partially written structured record.
    /// Returns true only for the call that made the transition.
    async fn mark_failed(&self, id: Uuid, error: &str, warnings: &[String]) -> StoreResult<bool>;
}

// ────────────────────────────────────────────────────────────────────────────
// Processing jobs, bulk batches, drive syncs
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, job: NewProcessingJob) -> StoreResult<ProcessingJob>;

    async fn get_job_by_resume(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>>;

    /// Starts a new attempt: status `processing`, progress reset to 0.
    /// Returns `None` when the job is cancelled or already terminal.
    async fn start_attempt(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>>;

    /// Records progress for the current attempt. Never lowers `progress`
    /// within an attempt; `publish` is set only when the value exceeds every
    /// value previously published for this resume.
    async fn update_progress(
        &self,
        resume_id: Uuid,
        progress: i32,
        step: &str,
    ) -> StoreResult<ProgressUpdate>;

    /// Bumps `retry_count`, puts the job back to `queued` and records the error.
    async fn schedule_retry(&self, resume_id: Uuid, error: &str) -> StoreResult<ProcessingJob>;

    /// Moves a non-terminal job to a terminal status. Completion also sets
    /// progress to 100. Returns false when the job was already terminal.
    async fn finish_job(
        &self,
        resume_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<bool>;

    /// Cancels a job that has not started yet.
    async fn cancel_job(&self, resume_id: Uuid) -> StoreResult<bool>;

    /// Deletes terminal jobs finished before `before`; returns the count.
    async fn delete_finished_jobs(&self, before: DateTime<Utc>) -> StoreResult<u64>;

    async fn create_batch(&self, uploader_id: Uuid, total_files: i32) -> StoreResult<BulkBatch>;

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BulkBatch>>;

    /// Counts one terminal sub-job against the batch. The batch becomes
    /// `completed` when every file is accounted for.
    async fn record_batch_outcome(&self, batch_id: Uuid, succeeded: bool)
        -> StoreResult<BulkBatch>;

    /// Opens a sync for a folder, or returns `None` when a sync for the same
    /// folder started less than `stale_after` ago is still running.
    async fn begin_drive_sync(
        &self,
        folder_id: &str,
        owner_id: Uuid,
        stale_after: Duration,
    ) -> StoreResult<Option<DriveSync>>;

    async fn finish_drive_sync(
        &self,
        id: Uuid,
        counts: DriveSyncCounts,
        error: Option<&str>,
    ) -> StoreResult<DriveSync>;
}

// ────────────────────────────────────────────────────────────────────────────
// Candidates, jobs and matches
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait MatchRepository: Send + Sync {
    /// Creates or refreshes a candidate keyed by (uploader, dedup key).
    /// The flag is true when the row was newly created.
    async fn upsert_candidate(
        &self,
        candidate: CandidateUpsert,
    ) -> StoreResult<(CandidateProfile, bool)>;

    async fn get_candidate_by_resume(&self, resume_id: Uuid)
        -> StoreResult<Option<CandidateProfile>>;

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobPosting>>;

    /// Active jobs visible to the candidate's pool.
    async fn jobs_for_candidate(
        &self,
        candidate: &CandidateProfile,
    ) -> StoreResult<Vec<JobPosting>>;

    /// Candidates visible to the job's recruiter: public ones plus the
    /// recruiter's own pool.
    async fn candidates_for_job(&self, job: &JobPosting) -> StoreResult<Vec<CandidateProfile>>;

    async fn active_job_ids(&self) -> StoreResult<Vec<Uuid>>;

    /// Inserts or refreshes the single active match for (candidate, job).
    async fn upsert_match(&self, new_match: NewCandidateMatch) -> StoreResult<CandidateMatch>;

    /// Deactivates the active match for (candidate, job) if one exists.
    async fn deactivate_match(&self, candidate_id: Uuid, job_id: Uuid) -> StoreResult<bool>;
}

// ────────────────────────────────────────────────────────────────────────────
// Feedback and fine-tuning
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LearningRepository: Send + Sync {
    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<FeedbackRecord>;

    /// Latest feedback per resume with accuracy ≥ `min_accuracy`, paired with
    /// the resume's raw text.
    async fn training_examples(&self, min_accuracy: f64) -> StoreResult<Vec<TrainingExample>>;

    /// Number of high-accuracy feedback rows written after `since`.
    async fn count_feedback_since(
        &self,
        min_accuracy: f64,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64>;

    async fn latest_fine_tune_run(&self) -> StoreResult<Option<FineTuneRun>>;

    async fn insert_fine_tune_run(
        &self,
        provider_job_id: &str,
        training_file_id: &str,
        example_count: i32,
        status: &str,
    ) -> StoreResult<FineTuneRun>;

    async fn update_fine_tune_run(
        &self,
        id: Uuid,
        status: &str,
        fine_tuned_model: Option<&str>,
    ) -> StoreResult<()>;
}

/// Everything the job runner and the ingestion sources need.
pub trait PipelineStore:
    ResumeRepository + JobRepository + MatchRepository + LearningRepository
{
}

impl<T> PipelineStore for T where
    T: ResumeRepository + JobRepository + MatchRepository + LearningRepository
{
}
