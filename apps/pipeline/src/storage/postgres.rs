use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Row};
use tracing::debug;
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
use crate::storage::{
    JobRepository, LearningRepository, MatchRepository, ResumeRepository, StoreError,
    StoreResult,
};

/// PostgreSQL implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ResumeRepository for PgStore {
    async fn insert_file(&self, file: NewResumeFile) -> StoreResult<ResumeFile> {
        // No-op update so RETURNING yields the existing row on a duplicate.
        let row: ResumeFile = sqlx::query_as(
            r#"
            INSERT INTO resume_files
                (id, content_hash, blob_key, original_filename, extension, byte_size,
                 uploader_id, uploader_role)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (uploader_id, content_hash)
                DO UPDATE SET content_hash = EXCLUDED.content_hash
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&file.content_hash)
        .bind(&file.blob_key)
        .bind(&file.original_filename)
        .bind(&file.extension)
        .bind(file.byte_size)
        .bind(file.uploader_id)
        .bind(file.uploader_role.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<ResumeFile>> {
        let row = sqlx::query_as("SELECT * FROM resume_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_record(&self, record: NewResumeRecord) -> StoreResult<ResumeRecord> {
        let row: ResumeRecord = sqlx::query_as(
            r#"
            INSERT INTO resume_records
                (id, file_id, original_filename, extension, uploader_id, uploader_role,
                 status, source, batch_id, drive_file_id)
            VALUES ($1, $2, $3, $4, $5, $6, 'uploaded', $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.file_id)
        .bind(&record.original_filename)
        .bind(&record.extension)
        .bind(record.uploader_id)
        .bind(record.uploader_role.as_str())
        .bind(record.source.as_str())
        .bind(record.batch_id)
        .bind(&record.drive_file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_record(&self, id: Uuid) -> StoreResult<Option<ResumeRecord>> {
        let row = sqlx::query_as("SELECT * FROM resume_records WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn drive_file_ingested(&self, drive_file_id: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM resume_records WHERE drive_file_id = $1)",
        )
        .bind(drive_file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resume_records
            SET status = 'processing',
                processing_started_at = now(),
                processing_ended_at = NULL,
                attempts = attempts + 1
            WHERE id = $1 AND status IN ('uploaded', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_resume_data(&self, resume_id: Uuid, data: &ResumeData) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_data (resume_id, data, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (resume_id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()
            "#,
        )
        .bind(resume_id)
        .bind(Json(data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_resume_data(&self, resume_id: Uuid) -> StoreResult<Option<ResumeData>> {
        let row: Option<Json<ResumeData>> =
            sqlx::query_scalar("SELECT data FROM resume_data WHERE resume_id = $1")
                .bind(resume_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(data)| data))
    }

    async fn set_candidate(&self, resume_id: Uuid, candidate_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE resume_records SET candidate_id = $2 WHERE id = $1")
            .bind(resume_id)
            .bind(candidate_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resume_records
            SET status = 'completed', error = NULL, warnings = $2, processing_ended_at = now()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(warnings)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, error: &str, warnings: &[String]) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE resume_records
            SET status = 'failed', error = $2, warnings = $3, processing_ended_at = now()
            WHERE id = $1 AND status IN ('uploaded', 'processing')
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(warnings)
        .execute(&mut *tx)
        .await?;

        let transitioned = result.rows_affected() > 0;
        if transitioned {
            sqlx::query("DELETE FROM resume_data WHERE resume_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(transitioned)
    }
}

#[async_trait]
impl JobRepository for PgStore {
    async fn create_job(&self, job: NewProcessingJob) -> StoreResult<ProcessingJob> {
        let row: ProcessingJob = sqlx::query_as(
            r#"
            INSERT INTO processing_jobs (id, resume_id, task_id, status, priority, max_retries)
            VALUES ($1, $2, $3, 'queued', $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.resume_id)
        .bind(job.task_id)
        .bind(job.priority)
        .bind(job.max_retries)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_job_by_resume(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        let row = sqlx::query_as("SELECT * FROM processing_jobs WHERE resume_id = $1")
            .bind(resume_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn start_attempt(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        // 'processing' is accepted so a task redelivered after a worker crash
        // can start over.
        let row = sqlx::query_as(
            r#"
            UPDATE processing_jobs
            SET status = 'processing', progress = 0, current_step = NULL,
                started_at = now(), updated_at = now()
            WHERE resume_id = $1 AND status IN ('queued', 'processing')
            RETURNING *
            "#,
        )
        .bind(resume_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_progress(
        &self,
        resume_id: Uuid,
        progress: i32,
        step: &str,
    ) -> StoreResult<ProgressUpdate> {
        let progress = progress.clamp(0, 100);
        let mut tx = self.pool.begin().await?;

        let previous: Option<i32> = sqlx::query_scalar(
            "SELECT published_progress FROM processing_jobs WHERE resume_id = $1 FOR UPDATE",
        )
        .bind(resume_id)
        .fetch_optional(&mut *tx)
        .await?;
        let previous =
            previous.ok_or_else(|| StoreError::NotFound(format!("job for resume {resume_id}")))?;

        sqlx::query(
            r#"
            UPDATE processing_jobs
            SET progress = GREATEST(progress, $2),
                published_progress = GREATEST(published_progress, $2),
                current_step = $3,
                updated_at = now()
            WHERE resume_id = $1
            "#,
        )
        .bind(resume_id)
        .bind(progress)
        .bind(step)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(ProgressUpdate {
            publish: progress > previous,
        })
    }

    async fn schedule_retry(&self, resume_id: Uuid, error: &str) -> StoreResult<ProcessingJob> {
        let row: Option<ProcessingJob> = sqlx::query_as(
            r#"
            UPDATE processing_jobs
            SET retry_count = retry_count + 1, status = 'queued', progress = 0,
                current_step = NULL, error = $2, updated_at = now()
            WHERE resume_id = $1
            RETURNING *
            "#,
        )
        .bind(resume_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("job for resume {resume_id}")))
    }

    async fn finish_job(
        &self,
        resume_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = $2,
                error = COALESCE($3, error),
                progress = CASE WHEN $2 = 'completed' THEN 100 ELSE progress END,
                completed_at = now(),
                updated_at = now()
            WHERE resume_id = $1 AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(resume_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_job(&self, resume_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE processing_jobs
            SET status = 'cancelled', completed_at = now(), updated_at = now()
            WHERE resume_id = $1 AND status = 'queued'
            "#,
        )
        .bind(resume_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_finished_jobs(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM processing_jobs
            WHERE status IN ('completed', 'failed', 'cancelled') AND completed_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_batch(&self, uploader_id: Uuid, total_files: i32) -> StoreResult<BulkBatch> {
        let row: BulkBatch = sqlx::query_as(
            r#"
            INSERT INTO bulk_batches (id, uploader_id, total_files, status)
            VALUES ($1, $2, $3, 'processing')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(uploader_id)
        .bind(total_files)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BulkBatch>> {
        let row = sqlx::query_as("SELECT * FROM bulk_batches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn record_batch_outcome(
        &self,
        batch_id: Uuid,
        succeeded: bool,
    ) -> StoreResult<BulkBatch> {
        // Column references in SET see the pre-update values.
        let row: Option<BulkBatch> = sqlx::query_as(
            r#"
            UPDATE bulk_batches
            SET successful_files = successful_files + $2,
                failed_files = failed_files + $3,
                status = CASE WHEN successful_files + failed_files + 1 >= total_files
                              THEN 'completed' ELSE status END,
                completed_at = CASE WHEN successful_files + failed_files + 1 >= total_files
                                    THEN now() ELSE completed_at END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(batch_id)
        .bind(i32::from(succeeded))
        .bind(i32::from(!succeeded))
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))
    }

    async fn begin_drive_sync(
        &self,
        folder_id: &str,
        owner_id: Uuid,
        stale_after: Duration,
    ) -> StoreResult<Option<DriveSync>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::hours(1));
        let running: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM drive_syncs
                WHERE folder_id = $1 AND status = 'processing' AND started_at > $2
            )
            "#,
        )
        .bind(folder_id)
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;

        if running {
            debug!(folder_id, "drive sync already running");
            tx.commit().await?;
            return Ok(None);
        }

        let row: DriveSync = sqlx::query_as(
            r#"
            INSERT INTO drive_syncs (id, folder_id, owner_id, status)
            VALUES ($1, $2, $3, 'processing')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(folder_id)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(row))
    }

    async fn finish_drive_sync(
        &self,
        id: Uuid,
        counts: DriveSyncCounts,
        error: Option<&str>,
    ) -> StoreResult<DriveSync> {
        let status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        let row: Option<DriveSync> = sqlx::query_as(
            r#"
            UPDATE drive_syncs
            SET status = $2, files_found = $3, files_ingested = $4, files_skipped = $5,
                files_failed = $6, error = $7, completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(counts.files_found)
        .bind(counts.files_ingested)
        .bind(counts.files_skipped)
        .bind(counts.files_failed)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::NotFound(format!("drive sync {id}")))
    }
}

#[async_trait]
impl MatchRepository for PgStore {
    async fn upsert_candidate(
        &self,
        candidate: CandidateUpsert,
    ) -> StoreResult<(CandidateProfile, bool)> {
        let dedup_key = candidate.dedup_key();
        let row = sqlx::query(
            r#"
            INSERT INTO candidates
                (id, user_id, owner_recruiter_id, dedup_key, resume_id, name, email, phone,
                 location, skills, total_years_experience, education_level, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id, dedup_key) DO UPDATE SET
                resume_id = EXCLUDED.resume_id,
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                location = EXCLUDED.location,
                skills = EXCLUDED.skills,
                total_years_experience = EXCLUDED.total_years_experience,
                education_level = EXCLUDED.education_level,
                summary = EXCLUDED.summary,
                updated_at = now()
            RETURNING *, (xmax = 0) AS inserted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(candidate.user_id)
        .bind(candidate.owner_recruiter_id)
        .bind(&dedup_key)
        .bind(candidate.resume_id)
        .bind(&candidate.name)
        .bind(&candidate.email)
        .bind(&candidate.phone)
        .bind(&candidate.location)
        .bind(&candidate.skills)
        .bind(candidate.total_years_experience)
        .bind(candidate.education_level)
        .bind(&candidate.summary)
        .fetch_one(&self.pool)
        .await?;

        let profile = CandidateProfile::from_row(&row)?;
        let inserted: bool = row.try_get("inserted")?;
        Ok((profile, inserted))
    }

    async fn get_candidate_by_resume(
        &self,
        resume_id: Uuid,
    ) -> StoreResult<Option<CandidateProfile>> {
        let row = sqlx::query_as(
            "SELECT * FROM candidates WHERE resume_id = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(resume_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobPosting>> {
        let row = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn jobs_for_candidate(
        &self,
        candidate: &CandidateProfile,
    ) -> StoreResult<Vec<JobPosting>> {
        let rows = sqlx::query_as(
            "SELECT * FROM jobs WHERE is_active AND ($1::uuid IS NULL OR recruiter_id = $1)",
        )
        .bind(candidate.owner_recruiter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn candidates_for_job(&self, job: &JobPosting) -> StoreResult<Vec<CandidateProfile>> {
        let rows = sqlx::query_as(
            "SELECT * FROM candidates WHERE owner_recruiter_id IS NULL OR owner_recruiter_id = $1",
        )
        .bind(job.recruiter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn active_job_ids(&self) -> StoreResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar("SELECT id FROM jobs WHERE is_active ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn upsert_match(&self, new_match: NewCandidateMatch) -> StoreResult<CandidateMatch> {
        let row: CandidateMatch = sqlx::query_as(
            r#"
            INSERT INTO candidate_matches
                (id, candidate_id, job_id, overall_score, skill_score, experience_score,
                 education_score, location_score, matching_skills, missing_skills, explanation)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (candidate_id, job_id) WHERE is_active DO UPDATE SET
                overall_score = EXCLUDED.overall_score,
                skill_score = EXCLUDED.skill_score,
                experience_score = EXCLUDED.experience_score,
                education_score = EXCLUDED.education_score,
                location_score = EXCLUDED.location_score,
                matching_skills = EXCLUDED.matching_skills,
                missing_skills = EXCLUDED.missing_skills,
                explanation = EXCLUDED.explanation,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_match.candidate_id)
        .bind(new_match.job_id)
        .bind(new_match.overall_score)
        .bind(new_match.skill_score)
        .bind(new_match.experience_score)
        .bind(new_match.education_score)
        .bind(new_match.location_score)
        .bind(&new_match.matching_skills)
        .bind(&new_match.missing_skills)
        .bind(&new_match.explanation)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn deactivate_match(&self, candidate_id: Uuid, job_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE candidate_matches SET is_active = FALSE, updated_at = now()
            WHERE candidate_id = $1 AND job_id = $2 AND is_active
            "#,
        )
        .bind(candidate_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(FromRow)]
struct TrainingRow {
    resume_id: Uuid,
    corrected: Json<ResumeData>,
    accuracy: f64,
    raw_text: Option<String>,
}

#[async_trait]
impl LearningRepository for PgStore {
    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<FeedbackRecord> {
        let row: FeedbackRecord = sqlx::query_as(
            r#"
            INSERT INTO feedback_records
                (id, resume_id, recruiter_id, original, corrected, accuracy, corrections, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(feedback.resume_id)
        .bind(feedback.recruiter_id)
        .bind(Json(&feedback.original))
        .bind(Json(&feedback.corrected))
        .bind(feedback.accuracy)
        .bind(Json(&feedback.corrections))
        .bind(&feedback.notes)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn training_examples(&self, min_accuracy: f64) -> StoreResult<Vec<TrainingExample>> {
        let rows: Vec<TrainingRow> = sqlx::query_as(
            r#"
            SELECT DISTINCT ON (f.resume_id)
                f.resume_id,
                f.corrected,
                f.accuracy,
                COALESCE(d.data->>'raw_text', f.original->>'raw_text') AS raw_text
            FROM feedback_records f
            LEFT JOIN resume_data d ON d.resume_id = f.resume_id
            WHERE f.accuracy >= $1
            ORDER BY f.resume_id, f.created_at DESC
            "#,
        )
        .bind(min_accuracy)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let raw_text = row.raw_text.filter(|t| !t.trim().is_empty())?;
                Some(TrainingExample {
                    resume_id: row.resume_id,
                    raw_text,
                    corrected: row.corrected.0,
                    accuracy: row.accuracy,
                })
            })
            .collect())
    }

    async fn count_feedback_since(
        &self,
        min_accuracy: f64,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM feedback_records
            WHERE accuracy >= $1 AND ($2::timestamptz IS NULL OR created_at > $2)
            "#,
        )
        .bind(min_accuracy)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn latest_fine_tune_run(&self) -> StoreResult<Option<FineTuneRun>> {
        let row = sqlx::query_as("SELECT * FROM fine_tune_runs ORDER BY created_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn insert_fine_tune_run(
        &self,
        provider_job_id: &str,
        training_file_id: &str,
        example_count: i32,
        status: &str,
    ) -> StoreResult<FineTuneRun> {
        let row: FineTuneRun = sqlx::query_as(
            r#"
            INSERT INTO fine_tune_runs (id, provider_job_id, training_file_id, example_count, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider_job_id)
        .bind(training_file_id)
        .bind(example_count)
        .bind(status)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_fine_tune_run(
        &self,
        id: Uuid,
        status: &str,
        fine_tuned_model: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE fine_tune_runs
            SET status = $2, fine_tuned_model = COALESCE($3, fine_tuned_model)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(fine_tuned_model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
