use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::resume_data::ResumeData;

/// One field a recruiter changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCorrection {
    pub original: serde_json::Value,
    pub corrected: serde_json::Value,
}

/// Append-only recruiter correction.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub recruiter_id: Uuid,
    pub original: Json<ResumeData>,
    pub corrected: Json<ResumeData>,
    pub accuracy: f64,
    pub corrections: Json<BTreeMap<String, FieldCorrection>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub resume_id: Uuid,
    pub recruiter_id: Uuid,
    pub original: ResumeData,
    pub corrected: ResumeData,
    pub accuracy: f64,
    pub corrections: BTreeMap<String, FieldCorrection>,
    pub notes: Option<String>,
}

/// Cached embedding of a parsed resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub resume_id: Uuid,
    pub embedding: Vec<f32>,
    pub structured: ResumeData,
    pub accuracy: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Raw text paired with the recruiter-corrected record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub resume_id: Uuid,
    pub raw_text: String,
    pub corrected: ResumeData,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FineTuneRun {
    pub id: Uuid,
    pub provider_job_id: String,
    pub training_file_id: String,
    pub example_count: i32,
    pub status: String,
    pub fine_tuned_model: Option<String>,
    pub created_at: DateTime<Utc>,
}
