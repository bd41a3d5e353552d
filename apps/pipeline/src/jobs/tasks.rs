//! Task handlers for every queue.
//!
//! `process-resume` runs the per-resume workflow:
//!
//! 1. mark the record `processing`, progress 10
//! 2. fetch the blob and run the parser, progress 60
//! 3. persist the structured record, progress 80
//! 4. create or refresh the candidate profile
//! 5. enqueue matching and embedding, progress 90
//! 6. complete the job (progress 100) and the record
//!
//! Every step is an upsert, so a retried attempt simply runs the workflow
//! again. Validation and extraction failures are terminal; everything else
//! retries with exponential backoff until `max_retries` is spent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, EventKind};
use crate::ingest::{DriveSyncer, IngestError};
use crate::jobs::queue::{JobQueue, QueueError, TaskEnvelope, TaskKind};
use crate::jobs::worker::TaskHandler;
use crate::learning::{LearningError, LearningStore};
use crate::matching::scoring::highest_degree_level;
use crate::matching::MatchEngine;
use crate::models::job::JobStatus;
use crate::models::matching::{CandidateMatch, CandidateProfile, CandidateUpsert};
use crate::models::resume::{ResumeRecord, ResumeStatus, UploaderRole};
use crate::models::resume_data::ResumeData;
use crate::parser::{ParseErrorKind, ParseOutcome, ResumeParser};
use crate::storage::{
    BlobStore, JobRepository, MatchRepository, PipelineStore, ResumeRepository, StoreError,
    StoreResult,
};

pub const DEFAULT_RETRY_BASE_SECS: u64 = 60;
pub const DEFAULT_JOB_RETENTION_DAYS: i64 = 30;
/// Attempts for tasks that have no processing-job row of their own.
const FOLLOW_UP_MAX_RETRIES: u32 = 3;

pub const MATCH_PRIORITY: u8 = 5;
pub const EMBEDDING_PRIORITY: u8 = 3;
pub const REFRESH_PRIORITY: u8 = 2;

const STEP_EXTRACTING: &str = "Extracting text";
const STEP_STRUCTURING: &str = "Structuring";
const STEP_PROFILE: &str = "Creating candidate profile";
const STEP_MATCHING: &str = "Matching with jobs";
const STEP_COMPLETED: &str = "Completed";
const STEP_FAILED: &str = "Failed";
const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Parse {
        kind: ParseErrorKind,
        message: String,
    },

    #[error("Learning error: {0}")]
    Learning(#[from] LearningError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Task exceeded its hard time limit")]
    TimedOut,
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Parse { kind, .. } => !matches!(
                kind,
                ParseErrorKind::FileValidationError | ParseErrorKind::TextExtractionError
            ),
            _ => true,
        }
    }
}

/// `base · 2^prior_retries`, saturating.
pub fn retry_delay(base: Duration, prior_retries: u32) -> Duration {
    base.saturating_mul(1u32 << prior_retries.min(16))
}

pub struct TaskRunner {
    store: Arc<dyn PipelineStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    parser: Arc<ResumeParser>,
    matcher: MatchEngine,
    learning: Arc<LearningStore>,
    drive: Option<Arc<DriveSyncer>>,
    events: EventBus,
    retry_base: Duration,
    job_retention: chrono::Duration,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        parser: Arc<ResumeParser>,
        learning: Arc<LearningStore>,
        events: EventBus,
    ) -> Self {
        Self {
            matcher: MatchEngine::new(store.clone()),
            store,
            blobs,
            queue,
            parser,
            learning,
            drive: None,
            events,
            retry_base: Duration::from_secs(DEFAULT_RETRY_BASE_SECS),
            job_retention: chrono::Duration::days(DEFAULT_JOB_RETENTION_DAYS),
        }
    }

    pub fn with_drive(mut self, syncer: Arc<DriveSyncer>) -> Self {
        self.drive = Some(syncer);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_job_retention_days(mut self, days: i64) -> Self {
        self.job_retention = chrono::Duration::days(days.max(0));
        self
    }

    /// Cancels a resume whose job has not started yet. Returns false when
    /// the job is already running or finished.
    pub async fn cancel(&self, resume_id: Uuid) -> StoreResult<bool> {
        if !self.store.cancel_job(resume_id).await? {
            return Ok(false);
        }
        info!(resume_id = %resume_id, "Resume processing cancelled");
        if let Some(record) = self.store.get_record(resume_id).await? {
            if self.store.mark_failed(resume_id, CANCELLED_MESSAGE, &[]).await? {
                self.publish_failure(&record, CANCELLED_MESSAGE).await?;
                self.count_batch_outcome(&record, false).await?;
            }
        }
        Ok(true)
    }

    // ────────────────────────────────────────────────────────────────────────
    // process-resume
    // ────────────────────────────────────────────────────────────────────────

    pub async fn process_resume(&self, envelope: &TaskEnvelope, resume_id: Uuid) {
        if let Err(e) = self.run_resume(resume_id).await {
            self.resume_failed(envelope, resume_id, e).await;
        }
    }

    async fn run_resume(&self, resume_id: Uuid) -> Result<(), TaskError> {
        if self.store.start_attempt(resume_id).await?.is_none() {
            debug!(resume_id = %resume_id, "Job cancelled or finished, skipping");
            return Ok(());
        }
        let Some(record) = self.store.get_record(resume_id).await? else {
            warn!(resume_id = %resume_id, "Resume record missing, dropping job");
            self.store
                .finish_job(resume_id, JobStatus::Failed, Some("resume record missing"))
                .await?;
            return Ok(());
        };
        if !self.store.mark_processing(resume_id).await? {
            // Already terminal from an earlier delivery.
            let status = if record.status == ResumeStatus::Completed {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            self.store.finish_job(resume_id, status, None).await?;
            return Ok(());
        }

        self.progress(&record, 10, STEP_EXTRACTING, ResumeStatus::Processing)
            .await?;
        let (data, warnings) = self.parse(&record).await?;
        self.progress(&record, 60, STEP_STRUCTURING, ResumeStatus::Processing)
            .await?;

        self.store.upsert_resume_data(resume_id, &data).await?;
        self.progress(&record, 80, STEP_PROFILE, ResumeStatus::Processing)
            .await?;

        let candidate = self.upsert_candidate(&record, &data).await?;

        self.progress(&record, 90, STEP_MATCHING, ResumeStatus::Processing)
            .await?;
        self.queue
            .enqueue(&TaskEnvelope::new(
                TaskKind::MatchCandidateToJobs { resume_id },
                MATCH_PRIORITY,
            ))
            .await?;
        self.queue
            .enqueue(&TaskEnvelope::new(
                TaskKind::StoreEmbedding { resume_id },
                EMBEDDING_PRIORITY,
            ))
            .await?;

        let completed = self.store.mark_completed(resume_id, &warnings).await?;
        self.store
            .finish_job(resume_id, JobStatus::Completed, None)
            .await?;
        self.progress(&record, 100, STEP_COMPLETED, ResumeStatus::Completed)
            .await?;

        if completed {
            info!(
                resume_id = %resume_id,
                candidate_id = %candidate.id,
                warnings = warnings.len(),
                "Resume processed"
            );
            self.events.publish(EventKind::ResumeCompleted {
                resume_id,
                uploader_id: record.uploader_id,
                candidate_id: Some(candidate.id),
                warnings,
            });
            self.count_batch_outcome(&record, true).await?;
        }
        Ok(())
    }

    /// Copies the blob to a scratch file and runs the parser on it.
    async fn parse(&self, record: &ResumeRecord) -> Result<(ResumeData, Vec<String>), TaskError> {
        let file = self
            .store
            .get_file(record.file_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("resume file {}", record.file_id)))?;
        let bytes = self.blobs.get(&file.blob_key).await?;

        let scratch = tempfile::tempdir()?;
        let path: PathBuf = if record.extension.is_empty() {
            scratch.path().join("resume")
        } else {
            scratch.path().join(format!("resume.{}", record.extension))
        };
        tokio::fs::write(&path, &bytes).await?;

        let result = self.parser.parse_named(&path, &record.original_filename).await;
        let kind = result.failure_kind();
        let message = result.failure_message();
        match result.outcome() {
            ParseOutcome::Parsed(data) => Ok((data, Vec::new())),
            ParseOutcome::Degraded { data, warnings } => Ok((data, warnings)),
            ParseOutcome::Failed { .. } => Err(TaskError::Parse {
                kind: kind.unwrap_or(ParseErrorKind::ResumeParsingError),
                message: message.unwrap_or_else(|| "Resume could not be parsed".to_string()),
            }),
        }
    }

    async fn upsert_candidate(
        &self,
        record: &ResumeRecord,
        data: &ResumeData,
    ) -> StoreResult<CandidateProfile> {
        let owner = (record.uploader_role == UploaderRole::Recruiter).then_some(record.uploader_id);
        let info = &data.personal_info;
        let (profile, created) = self
            .store
            .upsert_candidate(CandidateUpsert {
                user_id: record.uploader_id,
                owner_recruiter_id: owner,
                resume_id: record.id,
                name: info.name.clone(),
                email: info.email.clone(),
                phone: info.phone.clone(),
                location: info.location.clone(),
                skills: data.skill_names(),
                total_years_experience: data.total_years_experience,
                education_level: highest_degree_level(&data.education),
                summary: data.summary.clone().or_else(|| data.ai_summary.clone()),
            })
            .await?;
        self.store.set_candidate(record.id, profile.id).await?;

        if created {
            self.events.publish(EventKind::CandidateAdded {
                candidate_id: profile.id,
                resume_id: record.id,
                owner_recruiter_id: profile.owner_recruiter_id,
                name: profile.name.clone(),
            });
        }
        Ok(profile)
    }

    /// Records progress and publishes it when it raises the published mark.
    async fn progress(
        &self,
        record: &ResumeRecord,
        progress: i32,
        step: &str,
        status: ResumeStatus,
    ) -> StoreResult<()> {
        let update = self.store.update_progress(record.id, progress, step).await?;
        if update.publish {
            self.events.publish(EventKind::ResumeProgress {
                resume_id: record.id,
                uploader_id: record.uploader_id,
                status,
                progress,
                current_step: step.to_string(),
                error: None,
            });
        }
        Ok(())
    }

    async fn resume_failed(&self, envelope: &TaskEnvelope, resume_id: Uuid, err: TaskError) {
        if let Err(e) = self.apply_failure_policy(envelope, resume_id, &err).await {
            error!(
                resume_id = %resume_id,
                cause = %err,
                "Could not record resume failure: {e:?}"
            );
        }
    }

    async fn apply_failure_policy(
        &self,
        envelope: &TaskEnvelope,
        resume_id: Uuid,
        err: &TaskError,
    ) -> Result<(), TaskError> {
        let message = err.to_string();
        let Some(job) = self.store.get_job_by_resume(resume_id).await? else {
            warn!(resume_id = %resume_id, error = %message, "Failure for unknown job");
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        if err.is_retryable() && job.retry_count < job.max_retries {
            let delay = retry_delay(self.retry_base, job.retry_count.max(0) as u32);
            let job = self.store.schedule_retry(resume_id, &message).await?;
            self.queue.enqueue_delayed(&envelope.retry(), delay).await?;
            warn!(
                resume_id = %resume_id,
                retry = job.retry_count,
                max_retries = job.max_retries,
                delay_secs = delay.as_secs(),
                error = %message,
                "Resume processing failed, retry scheduled"
            );
            return Ok(());
        }

        error!(resume_id = %resume_id, error = %message, "Resume processing failed");
        let record = self.store.get_record(resume_id).await?;
        let failed = self.store.mark_failed(resume_id, &message, &[]).await?;
        self.store
            .finish_job(resume_id, JobStatus::Failed, Some(&message))
            .await?;
        if let (true, Some(record)) = (failed, record) {
            self.publish_failure(&record, &message).await?;
            self.count_batch_outcome(&record, false).await?;
        }
        Ok(())
    }

    /// Failure events repeat the last published progress so the per-resume
    /// sequence never goes backwards.
    async fn publish_failure(&self, record: &ResumeRecord, message: &str) -> StoreResult<()> {
        let progress = self
            .store
            .get_job_by_resume(record.id)
            .await?
            .map(|job| job.published_progress)
            .unwrap_or(0);
        self.events.publish(EventKind::ResumeProgress {
            resume_id: record.id,
            uploader_id: record.uploader_id,
            status: ResumeStatus::Failed,
            progress,
            current_step: STEP_FAILED.to_string(),
            error: Some(message.to_string()),
        });
        Ok(())
    }

    async fn count_batch_outcome(&self, record: &ResumeRecord, succeeded: bool) -> StoreResult<()> {
        let Some(batch_id) = record.batch_id else {
            return Ok(());
        };
        let batch = self.store.record_batch_outcome(batch_id, succeeded).await?;
        if batch.status == JobStatus::Completed && batch.processed() == batch.total_files {
            info!(
                batch_id = %batch.id,
                succeeded = batch.successful_files,
                failed = batch.failed_files,
                "Bulk upload finished"
            );
            self.events.publish(EventKind::BulkCompleted {
                batch_id: batch.id,
                uploader_id: batch.uploader_id,
                total_files: batch.total_files,
                successful_files: batch.successful_files,
                failed_files: batch.failed_files,
            });
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Follow-up and periodic tasks
    // ────────────────────────────────────────────────────────────────────────

    async fn run_follow_up(&self, task: &TaskKind) -> Result<(), TaskError> {
        match task {
            TaskKind::MatchCandidateToJobs { resume_id } => {
                let matches = self.matcher.match_candidate_to_jobs(*resume_id).await?;
                self.publish_matches(&matches);
            }
            TaskKind::MatchJobToCandidates { job_id } => {
                let matches = self.matcher.match_job_to_candidates(*job_id).await?;
                self.publish_matches(&matches);
            }
            TaskKind::StoreEmbedding { resume_id } => self.store_embedding(*resume_id).await?,
            TaskKind::SyncDrive {
                folder_id,
                owner_id,
            } => match &self.drive {
                Some(syncer) => {
                    syncer.sync_folder(folder_id, *owner_id).await?;
                }
                None => warn!(folder_id = %folder_id, "Drive sync requested but no drive is configured"),
            },
            TaskKind::RefreshMatches => {
                let jobs = self.store.active_job_ids().await?;
                for job_id in &jobs {
                    self.queue
                        .enqueue(&TaskEnvelope::new(
                            TaskKind::MatchJobToCandidates { job_id: *job_id },
                            REFRESH_PRIORITY,
                        ))
                        .await?;
                }
                info!(jobs = jobs.len(), "Match refresh queued");
            }
            TaskKind::CleanupJobs => {
                let before = Utc::now() - self.job_retention;
                let deleted = self.store.delete_finished_jobs(before).await?;
                info!(deleted, "Finished jobs cleaned up");
            }
            TaskKind::ProcessResume { .. } => {}
        }
        Ok(())
    }

    /// Embedding failures leave the resume unaffected and are not retried.
    async fn store_embedding(&self, resume_id: Uuid) -> Result<(), TaskError> {
        let Some(data) = self.store.get_resume_data(resume_id).await? else {
            debug!(resume_id = %resume_id, "No structured record to embed");
            return Ok(());
        };
        match self.learning.store_on_parse(resume_id, &data).await {
            Ok(_) => Ok(()),
            Err(LearningError::Llm(e)) => {
                warn!(resume_id = %resume_id, error = %e, "Embedding failed, skipping");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn publish_matches(&self, matches: &[CandidateMatch]) {
        for m in matches {
            self.events.publish(EventKind::MatchFound {
                match_id: m.id,
                candidate_id: m.candidate_id,
                job_id: m.job_id,
                overall_score: m.overall_score,
            });
        }
    }

    async fn follow_up_failed(&self, envelope: &TaskEnvelope, err: TaskError) {
        if envelope.attempt + 1 >= FOLLOW_UP_MAX_RETRIES {
            error!(
                task = envelope.task.name(),
                task_id = %envelope.id,
                attempts = envelope.attempt + 1,
                error = %err,
                "Task failed, giving up"
            );
            return;
        }
        let delay = retry_delay(self.retry_base, envelope.attempt);
        warn!(
            task = envelope.task.name(),
            task_id = %envelope.id,
            delay_secs = delay.as_secs(),
            error = %err,
            "Task failed, retry scheduled"
        );
        if let Err(e) = self.queue.enqueue_delayed(&envelope.retry(), delay).await {
            error!(task_id = %envelope.id, "Could not schedule retry: {e:?}");
        }
    }
}

#[async_trait]
impl TaskHandler for TaskRunner {
    async fn handle(&self, envelope: &TaskEnvelope) {
        match &envelope.task {
            TaskKind::ProcessResume { resume_id } => {
                self.process_resume(envelope, *resume_id).await
            }
            task => {
                if let Err(e) = self.run_follow_up(task).await {
                    self.follow_up_failed(envelope, e).await;
                }
            }
        }
    }

    async fn on_timeout(&self, envelope: &TaskEnvelope) {
        match &envelope.task {
            TaskKind::ProcessResume { resume_id } => {
                self.resume_failed(envelope, *resume_id, TaskError::TimedOut)
                    .await
            }
            _ => self.follow_up_failed(envelope, TaskError::TimedOut).await,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
