//! The structured resume record produced by the parser.
//!
//! Every top-level field is `#[serde(default)]` so that partially-populated LLM
//! output still deserializes; a record missing `personal_info`, `skills`,
//! `experience` or `education` gets sensible empties. Non-optional fields
//! also read an explicit `null` as their default.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::UnknownVariant;

/// Reads `null` the same way as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub portfolio: Option<String>,
}

impl PersonalInfo {
    /// Field name / value pairs, in a stable order.
    pub fn fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("name", self.name.as_deref()),
            ("email", self.email.as_deref()),
            ("phone", self.phone.as_deref()),
            ("location", self.location.as_deref()),
            ("linkedin", self.linkedin.as_deref()),
            ("github", self.github.as_deref()),
            ("portfolio", self.portfolio.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub current: bool,
    pub description: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub achievements: Vec<String>,
}

impl Experience {
    /// All free text attached to this role, lower-cased, for keyword lookups.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.title.as_deref());
        parts.extend(self.company.as_deref());
        parts.extend(self.description.as_deref());
        parts.extend(self.achievements.iter().map(String::as_str));
        parts.join("\n").to_lowercase()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    pub degree: Option<String>,
    pub institution: Option<String>,
    pub location: Option<String>,
    pub graduation_date: Option<String>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillCategory {
    Programming,
    Frontend,
    Backend,
    Database,
    Cloud,
    Data,
    Tools,
    #[default]
    #[serde(other)]
    Other,
    Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl FromStr for Proficiency {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" | "basic" | "novice" => Ok(Proficiency::Beginner),
            "intermediate" => Ok(Proficiency::Intermediate),
            "advanced" => Ok(Proficiency::Advanced),
            "expert" => Ok(Proficiency::Expert),
            other => Err(UnknownVariant::new("proficiency", other)),
        }
    }
}

/// Unknown proficiency labels become `None` instead of rejecting the record.
fn lenient_proficiency<'de, D>(deserializer: D) -> Result<Option<Proficiency>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// `null` or a non-string category becomes `Other`.
fn lenient_category<'de, D>(deserializer: D) -> Result<SkillCategory, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: SkillCategory,
    #[serde(default, deserialize_with = "lenient_proficiency")]
    pub proficiency: Option<Proficiency>,
}

impl Skill {
    pub fn named(name: impl Into<String>, category: SkillCategory) -> Self {
        Self {
            name: name.into(),
            category,
            proficiency: None,
        }
    }
}

/// Classification bucket used by the skill ranker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillClass {
    Technology,
    Domain,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub frequency: f64,
    pub recency: f64,
    pub context: f64,
    pub proficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSkill {
    pub name: String,
    pub score: f64,
    pub class: SkillClass,
    pub occurrences: u32,
    pub breakdown: ScoreBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingMetadata {
    pub total_skills_analyzed: usize,
    pub technology_skills_found: usize,
    pub domain_skills_found: usize,
    pub top_n: usize,
    pub ranked_at: DateTime<Utc>,
}

/// Provenance of a parse, attached to every completed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub extension: String,
    pub is_scanned: bool,
    pub extraction_method: String,
    pub parsed_at: DateTime<Utc>,
    pub parsing_time_seconds: f64,
    pub parser_version: String,
    pub llm_used: bool,
    pub ner_used: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeData {
    #[serde(deserialize_with = "null_as_default")]
    pub personal_info: PersonalInfo,
    pub summary: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub experience: Vec<Experience>,
    #[serde(deserialize_with = "null_as_default")]
    pub education: Vec<Education>,
    #[serde(deserialize_with = "null_as_default")]
    pub skills: Vec<Skill>,
    #[serde(deserialize_with = "null_as_default")]
    pub top_technology_skills: Vec<RankedSkill>,
    #[serde(deserialize_with = "null_as_default")]
    pub top_domain_skills: Vec<RankedSkill>,
    #[serde(deserialize_with = "null_as_default")]
    pub certifications: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub languages: Vec<String>,
    pub total_years_experience: Option<f64>,
    #[serde(deserialize_with = "null_as_default")]
    pub raw_text: String,
    pub ai_summary: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub key_strengths: Vec<String>,
    pub ranking_metadata: Option<RankingMetadata>,
    pub metadata: Option<ParseMetadata>,
}

impl ResumeData {
    pub fn skill_names(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.name.clone()).collect()
    }

    /// Copy of the record without derived fields, used as a training target
    /// and as the cached payload next to an embedding.
    pub fn without_derived(&self) -> ResumeData {
        ResumeData {
            raw_text: String::new(),
            top_technology_skills: Vec::new(),
            top_domain_skills: Vec::new(),
            ranking_metadata: None,
            metadata: None,
            ..self.clone()
        }
    }
}
