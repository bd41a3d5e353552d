use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::ingest::{BulkReceipt, IngestReceipt, UploadedFile, Uploader};
use crate::learning::FeedbackInput;
use crate::models::job::JobStatus;
use crate::models::learning::FieldCorrection;
use crate::models::resume::{ResumeStatus, UploaderRole};
use crate::models::resume_data::ResumeData;
use crate::state::AppState;
use crate::storage::{JobRepository, ResumeRepository};

/// Multipart body shared by single and bulk uploads: `uploader_id`,
/// `uploader_role` and one or more `file` parts.
struct UploadForm {
    uploader: Uploader,
    files: Vec<UploadedFile>,
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    AppError::Validation(format!("Invalid multipart body: {e}"))
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut uploader_id = None;
    let mut uploader_role = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "uploader_id" => {
                let text = field.text().await.map_err(bad_multipart)?;
                let id = Uuid::parse_str(text.trim())
                    .map_err(|_| AppError::Validation("uploader_id must be a UUID".into()))?;
                uploader_id = Some(id);
            }
            "uploader_role" => {
                let text = field.text().await.map_err(bad_multipart)?;
                let role = text
                    .trim()
                    .parse::<UploaderRole>()
                    .map_err(|e| AppError::Validation(e.to_string()))?;
                uploader_role = Some(role);
            }
            "file" | "files" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "resume".to_string());
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                files.push(UploadedFile { filename, bytes });
            }
            _ => {}
        }
    }

    let (Some(id), Some(role)) = (uploader_id, uploader_role) else {
        return Err(AppError::Validation(
            "uploader_id and uploader_role are required".into(),
        ));
    };
    Ok(UploadForm {
        uploader: Uploader { id, role },
        files,
    })
}

/// POST /api/v1/resumes
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReceipt>), AppError> {
    let form = read_upload_form(multipart).await?;
    let mut files = form.files;
    if files.len() != 1 {
        return Err(AppError::Validation(
            "Exactly one file part is required".into(),
        ));
    }
    let receipt = state.ingest.ingest_upload(form.uploader, files.remove(0)).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// POST /api/v1/resumes/bulk
pub async fn handle_bulk_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BulkReceipt>), AppError> {
    let form = read_upload_form(multipart).await?;
    let receipt = state.ingest.ingest_bulk(form.uploader, form.files).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

#[derive(Debug, Serialize)]
pub struct ResumeStatusResponse {
    pub resume_id: Uuid,
    pub status: ResumeStatus,
    pub progress: i32,
    pub current_step: Option<String>,
    pub job_status: Option<JobStatus>,
    pub retry_count: i32,
    pub attempts: i32,
    pub candidate_id: Option<Uuid>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
}

/// GET /api/v1/resumes/:id/status
pub async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeStatusResponse>, AppError> {
    let record = state
        .store
        .get_record(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {id} not found")))?;
    // Finished jobs may already have been cleaned up.
    let job = state.store.get_job_by_resume(id).await?;

    let progress = match &job {
        Some(job) => job.published_progress,
        None if record.status == ResumeStatus::Completed => 100,
        None => 0,
    };
    Ok(Json(ResumeStatusResponse {
        resume_id: record.id,
        status: record.status,
        progress,
        current_step: job.as_ref().and_then(|j| j.current_step.clone()),
        job_status: job.as_ref().map(|j| j.status),
        retry_count: job.as_ref().map_or(0, |j| j.retry_count),
        attempts: record.attempts,
        candidate_id: record.candidate_id,
        error: record.error,
        warnings: record.warnings,
        created_at: record.created_at,
        processing_started_at: record.processing_started_at,
        processing_ended_at: record.processing_ended_at,
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub resume_id: Uuid,
    pub cancelled: bool,
}

/// POST /api/v1/resumes/:id/cancel
pub async fn handle_cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, AppError> {
    if state.runner.cancel(id).await? {
        return Ok(Json(CancelResponse {
            resume_id: id,
            cancelled: true,
        }));
    }
    match state.store.get_record(id).await? {
        Some(_) => Err(AppError::Conflict(format!(
            "Resume {id} is already being processed or has finished"
        ))),
        None => Err(AppError::NotFound(format!("Resume {id} not found"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub recruiter_id: Uuid,
    pub corrected: ResumeData,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: Uuid,
    pub resume_id: Uuid,
    pub accuracy: f64,
    pub corrections: BTreeMap<String, FieldCorrection>,
}

/// POST /api/v1/resumes/:id/feedback
pub async fn handle_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let original = state
        .store
        .get_resume_data(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No parsed data for resume {id}")))?;

    let record = state
        .learning
        .record_feedback(FeedbackInput {
            resume_id: id,
            recruiter_id: req.recruiter_id,
            original,
            corrected: req.corrected,
            notes: req.notes,
        })
        .await?;

    Ok(Json(FeedbackResponse {
        feedback_id: record.id,
        resume_id: record.resume_id,
        accuracy: record.accuracy,
        corrections: record.corrections.0,
    }))
}
