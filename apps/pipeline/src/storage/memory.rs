//! In-memory implementations of the storage traits, used by tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::job::{
    BulkBatch, DriveSync, DriveSyncCounts, JobStatus, NewProcessingJob, ProcessingJob,
    ProgressUpdate,
};
use crate::models::learning::{FeedbackRecord, FineTuneRun, NewFeedback, TrainingExample};
use crate::models::matching::{
    CandidateMatch, CandidateProfile, CandidateUpsert, JobPosting, NewCandidateMatch,
};
use crate::models::resume::{
    NewResumeFile, NewResumeRecord, ResumeFile, ResumeRecord, ResumeStatus,
};
use crate::models::resume_data::ResumeData;
use crate::storage::{
    BlobStore, JobRepository, LearningRepository, MatchRepository, ResumeRepository, StoreError,
    StoreResult,
};

#[derive(Default)]
struct Tables {
    files: Vec<ResumeFile>,
    records: HashMap<Uuid, ResumeRecord>,
    data: HashMap<Uuid, ResumeData>,
    jobs: HashMap<Uuid, ProcessingJob>,
    batches: HashMap<Uuid, BulkBatch>,
    syncs: Vec<DriveSync>,
    candidates: Vec<(String, CandidateProfile)>,
    postings: Vec<JobPosting>,
    matches: Vec<CandidateMatch>,
    feedback: Vec<FeedbackRecord>,
    fine_tunes: Vec<FineTuneRun>,
    blobs: HashMap<String, Bytes>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job_posting(&self, posting: JobPosting) {
        self.tables.lock().unwrap().postings.push(posting);
    }

    pub fn matches(&self) -> Vec<CandidateMatch> {
        self.tables.lock().unwrap().matches.clone()
    }

    pub fn candidates(&self) -> Vec<CandidateProfile> {
        self.tables
            .lock()
            .unwrap()
            .candidates
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn feedback(&self) -> Vec<FeedbackRecord> {
        self.tables.lock().unwrap().feedback.clone()
    }

    pub fn records_for_uploader(&self, uploader_id: Uuid) -> Vec<ResumeRecord> {
        self.tables
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.uploader_id == uploader_id)
            .cloned()
            .collect()
    }

    pub fn blob_count(&self) -> usize {
        self.tables.lock().unwrap().blobs.len()
    }

    /// Backdates a finished job, for cleanup tests.
    pub fn set_job_completed_at(&self, resume_id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.tables.lock().unwrap().jobs.get_mut(&resume_id) {
            job.completed_at = Some(at);
        }
    }
}

#[async_trait]
impl ResumeRepository for MemoryStore {
    async fn insert_file(&self, file: NewResumeFile) -> StoreResult<ResumeFile> {
        let mut t = self.tables.lock().unwrap();
        if let Some(existing) = t
            .files
            .iter()
            .find(|f| f.uploader_id == file.uploader_id && f.content_hash == file.content_hash)
        {
            return Ok(existing.clone());
        }
        let row = ResumeFile {
            id: Uuid::new_v4(),
            content_hash: file.content_hash,
            blob_key: file.blob_key,
            original_filename: file.original_filename,
            extension: file.extension,
            byte_size: file.byte_size,
            uploader_id: file.uploader_id,
            uploader_role: file.uploader_role,
            created_at: Utc::now(),
        };
        t.files.push(row.clone());
        Ok(row)
    }

    async fn get_file(&self, id: Uuid) -> StoreResult<Option<ResumeFile>> {
        let t = self.tables.lock().unwrap();
        Ok(t.files.iter().find(|f| f.id == id).cloned())
    }

    async fn insert_record(&self, record: NewResumeRecord) -> StoreResult<ResumeRecord> {
        let mut t = self.tables.lock().unwrap();
        let row = ResumeRecord {
            id: Uuid::new_v4(),
            file_id: record.file_id,
            original_filename: record.original_filename,
            extension: record.extension,
            uploader_id: record.uploader_id,
            uploader_role: record.uploader_role,
            candidate_id: None,
            status: ResumeStatus::Uploaded,
            source: record.source,
            batch_id: record.batch_id,
            drive_file_id: record.drive_file_id,
            error: None,
            warnings: Vec::new(),
            attempts: 0,
            created_at: Utc::now(),
            processing_started_at: None,
            processing_ended_at: None,
        };
        t.records.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_record(&self, id: Uuid) -> StoreResult<Option<ResumeRecord>> {
        Ok(self.tables.lock().unwrap().records.get(&id).cloned())
    }

    async fn drive_file_ingested(&self, drive_file_id: &str) -> StoreResult<bool> {
        let t = self.tables.lock().unwrap();
        Ok(t.records
            .values()
            .any(|r| r.drive_file_id.as_deref() == Some(drive_file_id)))
    }

    async fn mark_processing(&self, id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        match t.records.get_mut(&id) {
            Some(r) if !r.status.is_terminal() => {
                r.status = ResumeStatus::Processing;
                r.processing_started_at = Some(Utc::now());
                r.processing_ended_at = None;
                r.attempts += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_resume_data(&self, resume_id: Uuid, data: &ResumeData) -> StoreResult<()> {
        self.tables
            .lock()
            .unwrap()
            .data
            .insert(resume_id, data.clone());
        Ok(())
    }

    async fn get_resume_data(&self, resume_id: Uuid) -> StoreResult<Option<ResumeData>> {
        Ok(self.tables.lock().unwrap().data.get(&resume_id).cloned())
    }

    async fn set_candidate(&self, resume_id: Uuid, candidate_id: Uuid) -> StoreResult<()> {
        if let Some(r) = self.tables.lock().unwrap().records.get_mut(&resume_id) {
            r.candidate_id = Some(candidate_id);
        }
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, warnings: &[String]) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        match t.records.get_mut(&id) {
            Some(r) if r.status == ResumeStatus::Processing => {
                r.status = ResumeStatus::Completed;
                r.error = None;
                r.warnings = warnings.to_vec();
                r.processing_ended_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid, error: &str, warnings: &[String]) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        let transitioned = match t.records.get_mut(&id) {
            Some(r) if !r.status.is_terminal() => {
                r.status = ResumeStatus::Failed;
                r.error = Some(error.to_string());
                r.warnings = warnings.to_vec();
                r.processing_ended_at = Some(Utc::now());
                true
            }
            _ => false,
        };
        if transitioned {
            t.data.remove(&id);
        }
        Ok(transitioned)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn create_job(&self, job: NewProcessingJob) -> StoreResult<ProcessingJob> {
        let now = Utc::now();
        let row = ProcessingJob {
            id: Uuid::new_v4(),
            resume_id: job.resume_id,
            task_id: job.task_id,
            status: JobStatus::Queued,
            priority: job.priority,
            progress: 0,
            published_progress: 0,
            current_step: None,
            retry_count: 0,
            max_retries: job.max_retries,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        };
        self.tables
            .lock()
            .unwrap()
            .jobs
            .insert(job.resume_id, row.clone());
        Ok(row)
    }

    async fn get_job_by_resume(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        Ok(self.tables.lock().unwrap().jobs.get(&resume_id).cloned())
    }

    async fn start_attempt(&self, resume_id: Uuid) -> StoreResult<Option<ProcessingJob>> {
        let mut t = self.tables.lock().unwrap();
        match t.jobs.get_mut(&resume_id) {
            Some(job) if matches!(job.status, JobStatus::Queued | JobStatus::Processing) => {
                job.status = JobStatus::Processing;
                job.progress = 0;
                job.current_step = None;
                job.started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_progress(
        &self,
        resume_id: Uuid,
        progress: i32,
        step: &str,
    ) -> StoreResult<ProgressUpdate> {
        let progress = progress.clamp(0, 100);
        let mut t = self.tables.lock().unwrap();
        let job = t
            .jobs
            .get_mut(&resume_id)
            .ok_or_else(|| StoreError::NotFound(format!("job for resume {resume_id}")))?;
        let previous = job.published_progress;
        job.progress = job.progress.max(progress);
        job.published_progress = previous.max(progress);
        job.current_step = Some(step.to_string());
        Ok(ProgressUpdate {
            publish: progress > previous,
        })
    }

    async fn schedule_retry(&self, resume_id: Uuid, error: &str) -> StoreResult<ProcessingJob> {
        let mut t = self.tables.lock().unwrap();
        let job = t
            .jobs
            .get_mut(&resume_id)
            .ok_or_else(|| StoreError::NotFound(format!("job for resume {resume_id}")))?;
        job.retry_count += 1;
        job.status = JobStatus::Queued;
        job.progress = 0;
        job.current_step = None;
        job.error = Some(error.to_string());
        Ok(job.clone())
    }

    async fn finish_job(
        &self,
        resume_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        match t.jobs.get_mut(&resume_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                if let Some(error) = error {
                    job.error = Some(error.to_string());
                }
                if status == JobStatus::Completed {
                    job.progress = 100;
                }
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_job(&self, resume_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        match t.jobs.get_mut(&resume_id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_finished_jobs(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut t = self.tables.lock().unwrap();
        let len = t.jobs.len();
        t.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.completed_at.is_some_and(|at| at < before))
        });
        Ok((len - t.jobs.len()) as u64)
    }

    async fn create_batch(&self, uploader_id: Uuid, total_files: i32) -> StoreResult<BulkBatch> {
        let row = BulkBatch {
            id: Uuid::new_v4(),
            uploader_id,
            total_files,
            successful_files: 0,
            failed_files: 0,
            status: JobStatus::Processing,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.tables
            .lock()
            .unwrap()
            .batches
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_batch(&self, id: Uuid) -> StoreResult<Option<BulkBatch>> {
        Ok(self.tables.lock().unwrap().batches.get(&id).cloned())
    }

    async fn record_batch_outcome(
        &self,
        batch_id: Uuid,
        succeeded: bool,
    ) -> StoreResult<BulkBatch> {
        let mut t = self.tables.lock().unwrap();
        let batch = t
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {batch_id}")))?;
        if succeeded {
            batch.successful_files += 1;
        } else {
            batch.failed_files += 1;
        }
        if batch.processed() >= batch.total_files {
            batch.status = JobStatus::Completed;
            batch.completed_at = Some(Utc::now());
        }
        Ok(batch.clone())
    }

    async fn begin_drive_sync(
        &self,
        folder_id: &str,
        owner_id: Uuid,
        stale_after: Duration,
    ) -> StoreResult<Option<DriveSync>> {
        let mut t = self.tables.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let running = t.syncs.iter().any(|s| {
            s.folder_id == folder_id && s.status == JobStatus::Processing && s.started_at > cutoff
        });
        if running {
            return Ok(None);
        }
        let row = DriveSync {
            id: Uuid::new_v4(),
            folder_id: folder_id.to_string(),
            owner_id,
            status: JobStatus::Processing,
            files_found: 0,
            files_ingested: 0,
            files_skipped: 0,
            files_failed: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };
        t.syncs.push(row.clone());
        Ok(Some(row))
    }

    async fn finish_drive_sync(
        &self,
        id: Uuid,
        counts: DriveSyncCounts,
        error: Option<&str>,
    ) -> StoreResult<DriveSync> {
        let mut t = self.tables.lock().unwrap();
        let sync = t
            .syncs
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("drive sync {id}")))?;
        sync.status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        sync.files_found = counts.files_found;
        sync.files_ingested = counts.files_ingested;
        sync.files_skipped = counts.files_skipped;
        sync.files_failed = counts.files_failed;
        sync.error = error.map(str::to_string);
        sync.completed_at = Some(Utc::now());
        Ok(sync.clone())
    }
}

#[async_trait]
impl MatchRepository for MemoryStore {
    async fn upsert_candidate(
        &self,
        candidate: CandidateUpsert,
    ) -> StoreResult<(CandidateProfile, bool)> {
        let key = candidate.dedup_key();
        let mut t = self.tables.lock().unwrap();
        let now = Utc::now();
        if let Some((_, existing)) = t
            .candidates
            .iter_mut()
            .find(|(k, c)| *k == key && c.user_id == candidate.user_id)
        {
            existing.resume_id = candidate.resume_id;
            existing.name = candidate.name;
            existing.email = candidate.email;
            existing.phone = candidate.phone;
            existing.location = candidate.location;
            existing.skills = candidate.skills;
            existing.total_years_experience = candidate.total_years_experience;
            existing.education_level = candidate.education_level;
            existing.summary = candidate.summary;
            existing.updated_at = now;
            return Ok((existing.clone(), false));
        }
        let profile = CandidateProfile {
            id: Uuid::new_v4(),
            user_id: candidate.user_id,
            owner_recruiter_id: candidate.owner_recruiter_id,
            resume_id: candidate.resume_id,
            name: candidate.name,
            email: candidate.email,
            phone: candidate.phone,
            location: candidate.location,
            skills: candidate.skills,
            total_years_experience: candidate.total_years_experience,
            education_level: candidate.education_level,
            summary: candidate.summary,
            created_at: now,
            updated_at: now,
        };
        t.candidates.push((key, profile.clone()));
        Ok((profile, true))
    }

    async fn get_candidate_by_resume(
        &self,
        resume_id: Uuid,
    ) -> StoreResult<Option<CandidateProfile>> {
        let t = self.tables.lock().unwrap();
        Ok(t.candidates
            .iter()
            .map(|(_, c)| c)
            .find(|c| c.resume_id == resume_id)
            .cloned())
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Option<JobPosting>> {
        let t = self.tables.lock().unwrap();
        Ok(t.postings.iter().find(|j| j.id == job_id).cloned())
    }

    async fn jobs_for_candidate(
        &self,
        candidate: &CandidateProfile,
    ) -> StoreResult<Vec<JobPosting>> {
        let t = self.tables.lock().unwrap();
        Ok(t.postings
            .iter()
            .filter(|j| j.is_active)
            .filter(|j| {
                candidate
                    .owner_recruiter_id
                    .map_or(true, |owner| owner == j.recruiter_id)
            })
            .cloned()
            .collect())
    }

    async fn candidates_for_job(&self, job: &JobPosting) -> StoreResult<Vec<CandidateProfile>> {
        let t = self.tables.lock().unwrap();
        Ok(t.candidates
            .iter()
            .map(|(_, c)| c)
            .filter(|c| {
                c.owner_recruiter_id
                    .map_or(true, |owner| owner == job.recruiter_id)
            })
            .cloned()
            .collect())
    }

    async fn active_job_ids(&self) -> StoreResult<Vec<Uuid>> {
        let t = self.tables.lock().unwrap();
        Ok(t.postings
            .iter()
            .filter(|j| j.is_active)
            .map(|j| j.id)
            .collect())
    }

    async fn upsert_match(&self, new_match: NewCandidateMatch) -> StoreResult<CandidateMatch> {
        let mut t = self.tables.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = t.matches.iter_mut().find(|m| {
            m.is_active && m.candidate_id == new_match.candidate_id && m.job_id == new_match.job_id
        }) {
            existing.overall_score = new_match.overall_score;
            existing.skill_score = new_match.skill_score;
            existing.experience_score = new_match.experience_score;
            existing.education_score = new_match.education_score;
            existing.location_score = new_match.location_score;
            existing.matching_skills = new_match.matching_skills;
            existing.missing_skills = new_match.missing_skills;
            existing.explanation = new_match.explanation;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        let row = CandidateMatch {
            id: Uuid::new_v4(),
            candidate_id: new_match.candidate_id,
            job_id: new_match.job_id,
            overall_score: new_match.overall_score,
            skill_score: new_match.skill_score,
            experience_score: new_match.experience_score,
            education_score: new_match.education_score,
            location_score: new_match.location_score,
            matching_skills: new_match.matching_skills,
            missing_skills: new_match.missing_skills,
            explanation: new_match.explanation,
            viewed: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        t.matches.push(row.clone());
        Ok(row)
    }

    async fn deactivate_match(&self, candidate_id: Uuid, job_id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        let mut changed = false;
        for m in t
            .matches
            .iter_mut()
            .filter(|m| m.is_active && m.candidate_id == candidate_id && m.job_id == job_id)
        {
            m.is_active = false;
            changed = true;
        }
        Ok(changed)
    }
}

#[async_trait]
impl LearningRepository for MemoryStore {
    async fn insert_feedback(&self, feedback: NewFeedback) -> StoreResult<FeedbackRecord> {
        let row = FeedbackRecord {
            id: Uuid::new_v4(),
            resume_id: feedback.resume_id,
            recruiter_id: feedback.recruiter_id,
            original: Json(feedback.original),
            corrected: Json(feedback.corrected),
            accuracy: feedback.accuracy,
            corrections: Json(feedback.corrections),
            notes: feedback.notes,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().feedback.push(row.clone());
        Ok(row)
    }

    async fn training_examples(&self, min_accuracy: f64) -> StoreResult<Vec<TrainingExample>> {
        let t = self.tables.lock().unwrap();
        let mut latest: HashMap<Uuid, &FeedbackRecord> = HashMap::new();
        for f in t.feedback.iter().filter(|f| f.accuracy >= min_accuracy) {
            match latest.get(&f.resume_id) {
                Some(prev) if prev.created_at > f.created_at => {}
                _ => {
                    latest.insert(f.resume_id, f);
                }
            }
        }
        Ok(latest
            .into_values()
            .filter_map(|f| {
                let raw_text = t
                    .data
                    .get(&f.resume_id)
                    .map(|d| d.raw_text.clone())
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| Some(f.original.raw_text.clone()))
                    .filter(|s| !s.trim().is_empty())?;
                Some(TrainingExample {
                    resume_id: f.resume_id,
                    raw_text,
                    corrected: f.corrected.0.clone(),
                    accuracy: f.accuracy,
                })
            })
            .collect())
    }

    async fn count_feedback_since(
        &self,
        min_accuracy: f64,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let t = self.tables.lock().unwrap();
        Ok(t.feedback
            .iter()
            .filter(|f| f.accuracy >= min_accuracy)
            .filter(|f| since.map_or(true, |s| f.created_at > s))
            .count() as i64)
    }

    async fn latest_fine_tune_run(&self) -> StoreResult<Option<FineTuneRun>> {
        let t = self.tables.lock().unwrap();
        Ok(t.fine_tunes.iter().max_by_key(|r| r.created_at).cloned())
    }

    async fn insert_fine_tune_run(
        &self,
        provider_job_id: &str,
        training_file_id: &str,
        example_count: i32,
        status: &str,
    ) -> StoreResult<FineTuneRun> {
        let row = FineTuneRun {
            id: Uuid::new_v4(),
            provider_job_id: provider_job_id.to_string(),
            training_file_id: training_file_id.to_string(),
            example_count,
            status: status.to_string(),
            fine_tuned_model: None,
            created_at: Utc::now(),
        };
        self.tables.lock().unwrap().fine_tunes.push(row.clone());
        Ok(row)
    }

    async fn update_fine_tune_run(
        &self,
        id: Uuid,
        status: &str,
        fine_tuned_model: Option<&str>,
    ) -> StoreResult<()> {
        let mut t = self.tables.lock().unwrap();
        if let Some(run) = t.fine_tunes.iter_mut().find(|r| r.id == id) {
            run.status = status.to_string();
            if let Some(model) = fine_tuned_model {
                run.fine_tuned_model = Some(model.to_string());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Bytes, _content_type: &str) -> StoreResult<()> {
        self.tables
            .lock()
            .unwrap()
            .blobs
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        self.tables
            .lock()
            .unwrap()
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {key}")))
    }
}
