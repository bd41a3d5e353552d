//! Ingestion sources.
//!
//! Single uploads, bulk batches and drive sync all go through
//! [`IngestionService`]: store the bytes content-addressed, insert the file
//! and record rows, create the processing job and enqueue it. Files are not
//! judged here; an unsupported or oversized file is accepted and fails at
//! validation so every upload has a record the uploader can inspect.

pub mod drive;

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::queue::{JobQueue, QueueError, TaskEnvelope, TaskKind};
use crate::models::job::{JobStatus, NewProcessingJob};
use crate::models::resume::{
    IngestionSource, MediaKind, NewResumeFile, NewResumeRecord, ResumeStatus, UploaderRole,
};
use crate::storage::blob::{blob_key, content_hash};
use crate::storage::{BlobStore, JobRepository, PipelineStore, ResumeRepository, StoreError};

pub use drive::{DriveError, DriveSource, DriveSyncer, GoogleDriveClient};

/// Queue priority per source, higher runs first.
pub const UPLOAD_PRIORITY: u8 = 5;
pub const BULK_PRIORITY: u8 = 4;
pub const DRIVE_PRIORITY: u8 = 3;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Drive error: {0}")]
    Drive(#[from] DriveError),

    #[error("Bulk upload contains no files")]
    EmptyBatch,
}

#[derive(Debug, Clone, Copy)]
pub struct Uploader {
    pub id: Uuid,
    pub role: UploaderRole,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub resume_id: Uuid,
    pub file_id: Uuid,
    pub task_id: Uuid,
    pub original_filename: String,
    pub status: ResumeStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkReceipt {
    pub batch_id: Uuid,
    pub total_files: i32,
    pub resumes: Vec<IngestReceipt>,
    /// Files that could not be stored; already counted as failed on the batch.
    pub rejected: Vec<String>,
}

/// Lower-cased extension after the last dot, empty when there is none.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

struct Origin {
    source: IngestionSource,
    batch_id: Option<Uuid>,
    drive_file_id: Option<String>,
    priority: u8,
}

pub struct IngestionService {
    store: Arc<dyn PipelineStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    max_retries: i32,
}

impl IngestionService {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<dyn JobQueue>,
        max_retries: i32,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            max_retries,
        }
    }

    pub async fn ingest_upload(
        &self,
        uploader: Uploader,
        file: UploadedFile,
    ) -> Result<IngestReceipt, IngestError> {
        self.ingest_one(
            uploader,
            file,
            Origin {
                source: IngestionSource::Upload,
                batch_id: None,
                drive_file_id: None,
                priority: UPLOAD_PRIORITY,
            },
        )
        .await
    }

    /// One batch envelope plus one ordinary job per file. A file that cannot
    /// be stored is counted as failed so the batch still completes.
    pub async fn ingest_bulk(
        &self,
        uploader: Uploader,
        files: Vec<UploadedFile>,
    ) -> Result<BulkReceipt, IngestError> {
        if files.is_empty() {
            return Err(IngestError::EmptyBatch);
        }
        let batch = self
            .store
            .create_batch(uploader.id, files.len() as i32)
            .await?;

        let mut resumes = Vec::with_capacity(files.len());
        let mut rejected = Vec::new();
        for file in files {
            let filename = file.filename.clone();
            let origin = Origin {
                source: IngestionSource::Bulk,
                batch_id: Some(batch.id),
                drive_file_id: None,
                priority: BULK_PRIORITY,
            };
            match self.ingest_one(uploader, file, origin).await {
                Ok(receipt) => resumes.push(receipt),
                Err(e) => {
                    warn!(batch_id = %batch.id, filename = %filename, error = %e, "Bulk file rejected");
                    self.store.record_batch_outcome(batch.id, false).await?;
                    rejected.push(filename);
                }
            }
        }

        info!(
            batch_id = %batch.id,
            total = batch.total_files,
            queued = resumes.len(),
            "Bulk upload queued"
        );
        Ok(BulkReceipt {
            batch_id: batch.id,
            total_files: batch.total_files,
            resumes,
            rejected,
        })
    }

    /// Drive files always belong to the recruiter who owns the folder.
    pub async fn ingest_drive_file(
        &self,
        owner_id: Uuid,
        drive_file_id: &str,
        file: UploadedFile,
    ) -> Result<IngestReceipt, IngestError> {
        self.ingest_one(
            Uploader {
                id: owner_id,
                role: UploaderRole::Recruiter,
            },
            file,
            Origin {
                source: IngestionSource::Drive,
                batch_id: None,
                drive_file_id: Some(drive_file_id.to_string()),
                priority: DRIVE_PRIORITY,
            },
        )
        .await
    }

    async fn ingest_one(
        &self,
        uploader: Uploader,
        file: UploadedFile,
        origin: Origin,
    ) -> Result<IngestReceipt, IngestError> {
        let extension = extension_of(&file.filename);
        let hash = content_hash(&file.bytes);
        let key = blob_key(&hash, &extension);
        let content_type = MediaKind::from_extension(&extension)
            .map(|k| k.content_type())
            .unwrap_or("application/octet-stream");
        let byte_size = file.bytes.len() as i64;
        let original_filename = file.filename.clone();

        self.blobs.put(&key, file.bytes, content_type).await?;

        let stored = self
            .store
            .insert_file(NewResumeFile {
                content_hash: hash,
                blob_key: key,
                original_filename: file.filename.clone(),
                extension: extension.clone(),
                byte_size,
                uploader_id: uploader.id,
                uploader_role: uploader.role,
            })
            .await?;

        let record = self
            .store
            .insert_record(NewResumeRecord {
                file_id: stored.id,
                original_filename: file.filename,
                extension,
                uploader_id: uploader.id,
                uploader_role: uploader.role,
                source: origin.source,
                batch_id: origin.batch_id,
                drive_file_id: origin.drive_file_id,
            })
            .await?;

        let envelope = TaskEnvelope::new(
            TaskKind::ProcessResume {
                resume_id: record.id,
            },
            origin.priority,
        );
        if let Err(e) = self.schedule(&envelope, record.id).await {
            self.abandon(record.id, &e).await;
            return Err(e);
        }

        info!(
            resume_id = %record.id,
            file_id = %stored.id,
            source = origin.source.as_str(),
            bytes = byte_size,
            "Resume queued for processing"
        );
        Ok(IngestReceipt {
            resume_id: record.id,
            file_id: stored.id,
            task_id: envelope.id,
            original_filename,
            status: record.status,
        })
    }

    async fn schedule(&self, envelope: &TaskEnvelope, resume_id: Uuid) -> Result<(), IngestError> {
        self.store
            .create_job(NewProcessingJob {
                resume_id,
                task_id: envelope.id,
                priority: i16::from(envelope.priority),
                max_retries: self.max_retries,
            })
            .await?;
        self.queue.enqueue(envelope).await?;
        Ok(())
    }

    /// Fails a record whose task never reached the queue so it does not sit
    /// in `uploaded` forever.
    async fn abandon(&self, resume_id: Uuid, cause: &IngestError) {
        let message = format!("Could not queue resume for processing: {cause}");
        if let Err(e) = self
            .store
            .finish_job(resume_id, JobStatus::Failed, Some(&message))
            .await
        {
            warn!(%resume_id, error = %e, "Failed to fail job after queueing error");
        }
        if let Err(e) = self.store.mark_failed(resume_id, &message, &[]).await {
            warn!(%resume_id, error = %e, "Failed to fail record after queueing error");
        }
        warn!(%resume_id, error = %cause, "Resume abandoned before processing");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
