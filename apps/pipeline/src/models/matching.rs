use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The pipeline's view of a candidate profile. The candidate record itself
/// belongs to the platform; the pipeline only creates and refreshes it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Set when the candidate lives in a recruiter's private pool.
    pub owner_recruiter_id: Option<Uuid>,
    pub resume_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub total_years_experience: Option<f64>,
    /// 1 (high school) – 5 (doctorate).
    pub education_level: Option<i16>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CandidateUpsert {
    pub user_id: Uuid,
    pub owner_recruiter_id: Option<Uuid>,
    pub resume_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub skills: Vec<String>,
    pub total_years_experience: Option<f64>,
    pub education_level: Option<i16>,
    pub summary: Option<String>,
}

impl CandidateUpsert {
    /// Upsert key within one uploader: lower-cased email, else the resume id.
    pub fn dedup_key(&self) -> String {
        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_lowercase(),
            _ => format!("resume:{}", self.resume_id),
        }
    }
}

/// A job posting as read by the match engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobPosting {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub title: String,
    pub required_skills: Vec<String>,
    pub preferred_skills: Vec<String>,
    pub min_years: Option<f64>,
    pub max_years: Option<f64>,
    pub education_level: Option<i16>,
    pub location: Option<String>,
    pub remote_ok: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateMatch {
    pub id: Uuid,
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub overall_score: f64,
    pub skill_score: f64,
    pub experience_score: f64,
    pub education_score: f64,
    pub location_score: f64,
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub explanation: String,
    pub viewed: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCandidateMatch {
    pub candidate_id: Uuid,
    pub job_id: Uuid,
    pub overall_score: f64,
    pub skill_score: f64,
    pub experience_score: f64,
    pub education_score: f64,
    pub location_score: f64,
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub explanation: String,
}
