use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::UnknownVariant;

/// Accepted resume media kinds. Anything else is stored but fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Pdf,
    Docx,
    Doc,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Pdf, MediaKind::Docx, MediaKind::Doc];

    /// Resolves a media kind from a bare extension (`"pdf"`, `".PDF"`, ...).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaKind::Pdf),
            "docx" => Some(MediaKind::Docx),
            "doc" => Some(MediaKind::Doc),
            _ => None,
        }
    }

    /// Resolves a media kind from a file name.
    pub fn from_filename(name: &str) -> Option<Self> {
        name.rsplit_once('.')
            .and_then(|(_, ext)| Self::from_extension(ext))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Pdf => "pdf",
            MediaKind::Docx => "docx",
            MediaKind::Doc => "doc",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            MediaKind::Pdf => "application/pdf",
            MediaKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            MediaKind::Doc => "application/msword",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploaderRole {
    Candidate,
    Recruiter,
}

impl UploaderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploaderRole::Candidate => "candidate",
            UploaderRole::Recruiter => "recruiter",
        }
    }
}

impl FromStr for UploaderRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(UploaderRole::Candidate),
            "recruiter" => Ok(UploaderRole::Recruiter),
            other => Err(UnknownVariant::new("uploader_role", other)),
        }
    }
}

impl TryFrom<String> for UploaderRole {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Processing state of one uploaded resume.
///
/// Advances `uploaded → processing → completed | failed`. A retry moves a
/// `processing` record back to `processing` (new attempt); terminal states
/// never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl ResumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeStatus::Uploaded => "uploaded",
            ResumeStatus::Processing => "processing",
            ResumeStatus::Completed => "completed",
            ResumeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResumeStatus::Completed | ResumeStatus::Failed)
    }
}

impl fmt::Display for ResumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResumeStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(ResumeStatus::Uploaded),
            "processing" => Ok(ResumeStatus::Processing),
            "completed" => Ok(ResumeStatus::Completed),
            "failed" => Ok(ResumeStatus::Failed),
            other => Err(UnknownVariant::new("resume_status", other)),
        }
    }
}

impl TryFrom<String> for ResumeStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where a resume entered the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionSource {
    Upload,
    Bulk,
    Drive,
}

impl IngestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionSource::Upload => "upload",
            IngestionSource::Bulk => "bulk",
            IngestionSource::Drive => "drive",
        }
    }
}

impl FromStr for IngestionSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(IngestionSource::Upload),
            "bulk" => Ok(IngestionSource::Bulk),
            "drive" => Ok(IngestionSource::Drive),
            other => Err(UnknownVariant::new("ingestion_source", other)),
        }
    }
}

impl TryFrom<String> for IngestionSource {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Immutable, content-addressed resume blob.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeFile {
    pub id: Uuid,
    /// Hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub blob_key: String,
    pub original_filename: String,
    /// Lower-cased extension without the dot, as uploaded.
    pub extension: String,
    pub byte_size: i64,
    pub uploader_id: Uuid,
    #[sqlx(try_from = "String")]
    pub uploader_role: UploaderRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewResumeFile {
    pub content_hash: String,
    pub blob_key: String,
    pub original_filename: String,
    pub extension: String,
    pub byte_size: i64,
    pub uploader_id: Uuid,
    pub uploader_role: UploaderRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeRecord {
    pub id: Uuid,
    pub file_id: Uuid,
    /// Name and extension of this upload; a reused file row keeps the first upload's.
    pub original_filename: String,
    pub extension: String,
    pub uploader_id: Uuid,
    #[sqlx(try_from = "String")]
    pub uploader_role: UploaderRole,
    pub candidate_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub status: ResumeStatus,
    #[sqlx(try_from = "String")]
    pub source: IngestionSource,
    pub batch_id: Option<Uuid>,
    pub drive_file_id: Option<String>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewResumeRecord {
    pub file_id: Uuid,
    pub original_filename: String,
    pub extension: String,
    pub uploader_id: Uuid,
    pub uploader_role: UploaderRole,
    pub source: IngestionSource,
    pub batch_id: Option<Uuid>,
    pub drive_file_id: Option<String>,
}
