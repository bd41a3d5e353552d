//! Candidate ↔ job scoring.
//!
//! Four sub-scores on a 0–100 scale, combined with fixed weights:
//!
//! | dimension  | weight |
//! |------------|--------|
//! | skills     | 0.50   |
//! | experience | 0.25   |
//! | education  | 0.15   |
//! | location   | 0.10   |
//!
//! Everything here is pure and deterministic; persistence lives in `mod.rs`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::matching::{CandidateProfile, JobPosting};
use crate::models::resume_data::Education;
use crate::parser::vocabulary::canonical_name;

pub const SKILL_WEIGHT: f64 = 0.50;
pub const EXPERIENCE_WEIGHT: f64 = 0.25;
pub const EDUCATION_WEIGHT: f64 = 0.15;
pub const LOCATION_WEIGHT: f64 = 0.10;

/// Matches below this overall score are never stored.
pub const MATCH_THRESHOLD: f64 = 50.0;

const PREFERRED_BONUS_PER_SKILL: f64 = 5.0;
const PREFERRED_BONUS_CAP: f64 = 20.0;
const BELOW_MIN_PENALTY_PER_YEAR: f64 = 10.0;
const ABOVE_MAX_PENALTY_PER_YEAR: f64 = 2.0;
const OVERQUALIFIED_FLOOR: f64 = 80.0;

// ────────────────────────────────────────────────────────────────────────────
// Output model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub overall: f64,
    pub skill: f64,
    pub experience: f64,
    pub education: f64,
    pub location: f64,
    /// Required and preferred skills the candidate has, in job order.
    pub matching_skills: Vec<String>,
    /// Required skills the candidate lacks.
    pub missing_skills: Vec<String>,
}

impl MatchScore {
    pub fn is_persistable(&self) -> bool {
        self.overall >= MATCH_THRESHOLD
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkillOverlap {
    pub score: f64,
    pub matching: Vec<String>,
    pub missing: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Sub-scores
// ────────────────────────────────────────────────────────────────────────────

fn skill_key(skill: &str) -> String {
    canonical_name(skill).to_lowercase()
}

/// `required_pct + min(5 · preferred_matches, 20)`, clamped to 100.
/// A job with no required skills starts from 100.
pub fn skill_score(candidate_skills: &[String], required: &[String], preferred: &[String]) -> SkillOverlap {
    let have: HashSet<String> = candidate_skills.iter().map(|s| skill_key(s)).collect();

    let mut matching = Vec::new();
    let mut missing = Vec::new();
    for skill in required {
        if have.contains(&skill_key(skill)) {
            matching.push(skill.clone());
        } else {
            missing.push(skill.clone());
        }
    }

    let required_pct = if required.is_empty() {
        100.0
    } else {
        matching.len() as f64 / required.len() as f64 * 100.0
    };

    let mut preferred_hits = 0usize;
    for skill in preferred {
        if have.contains(&skill_key(skill)) {
            preferred_hits += 1;
            if !matching.iter().any(|m| skill_key(m) == skill_key(skill)) {
                matching.push(skill.clone());
            }
        }
    }
    let bonus = (PREFERRED_BONUS_PER_SKILL * preferred_hits as f64).min(PREFERRED_BONUS_CAP);

    SkillOverlap {
        score: round2((required_pct + bonus).min(100.0)),
        matching,
        missing,
    }
}

/// 100 inside `[min, max]`; 10 points per missing year below the minimum;
/// 2 points per extra year above the maximum, never below 80. Unknown
/// candidate experience scores 50 against a job that states a range.
pub fn experience_score(years: Option<f64>, min_years: Option<f64>, max_years: Option<f64>) -> f64 {
    if min_years.is_none() && max_years.is_none() {
        return 100.0;
    }
    let Some(years) = years else {
        return 50.0;
    };

    if let Some(min) = min_years {
        if years < min {
            return round2((100.0 - BELOW_MIN_PENALTY_PER_YEAR * (min - years)).max(0.0));
        }
    }
    if let Some(max) = max_years {
        if years > max {
            return round2(
                (100.0 - ABOVE_MAX_PENALTY_PER_YEAR * (years - max)).max(OVERQUALIFIED_FLOOR),
            );
        }
    }
    100.0
}

/// Ordinal comparison on the 1 (high school) – 5 (doctorate) scale.
pub fn education_score(candidate_level: Option<i16>, required_level: Option<i16>) -> f64 {
    let Some(required) = required_level else {
        return 100.0;
    };
    match candidate_level {
        Some(level) if level >= required => 100.0,
        Some(level) if level == required - 1 => 75.0,
        _ => 50.0,
    }
}

pub fn location_score(candidate: Option<&str>, job: Option<&str>, remote_ok: bool) -> f64 {
    if remote_ok {
        return 100.0;
    }
    let (Some(candidate), Some(job)) = (
        candidate.map(str::trim).filter(|s| !s.is_empty()),
        job.map(str::trim).filter(|s| !s.is_empty()),
    ) else {
        return 50.0;
    };

    if candidate.eq_ignore_ascii_case(job) {
        return 100.0;
    }

    let tokens = |s: &str| -> HashSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_lowercase)
            .collect()
    };
    if tokens(candidate).intersection(&tokens(job)).next().is_some() {
        75.0
    } else {
        25.0
    }
}

/// Maps a free-text degree onto the 1–5 education ordinal.
pub fn degree_level(degree: &str) -> Option<i16> {
    let lower = degree.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    // Dotted abbreviations ("M.Sc.", "Ph.D.") collapse to one token.
    let abbr: String = lower
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    let starts = |p: &str| words.iter().any(|w| w.starts_with(p));
    let abbr_in = |set: &[&str]| set.contains(&abbr.as_str());

    if starts("doctor") || abbr_in(&["phd", "dphil", "edd", "md"]) {
        Some(5)
    } else if starts("master") || abbr_in(&["ms", "msc", "ma", "mba", "meng", "mtech", "mca"]) {
        Some(4)
    } else if starts("bachelor")
        || abbr_in(&["bs", "bsc", "ba", "be", "beng", "btech", "bca", "bcom"])
    {
        Some(3)
    } else if starts("associate") || abbr_in(&["aa", "as", "aas"]) {
        Some(2)
    } else if lower.contains("high school") || abbr_in(&["ged"]) || starts("diploma") {
        Some(1)
    } else {
        None
    }
}

/// Highest recognisable degree level across a candidate's education.
pub fn highest_degree_level(education: &[Education]) -> Option<i16> {
    education
        .iter()
        .filter_map(|e| e.degree.as_deref())
        .filter_map(degree_level)
        .max()
}

// ────────────────────────────────────────────────────────────────────────────
// Combination
// ────────────────────────────────────────────────────────────────────────────

pub fn score_match(candidate: &CandidateProfile, job: &JobPosting) -> MatchScore {
    let skills = skill_score(&candidate.skills, &job.required_skills, &job.preferred_skills);
    let experience = experience_score(candidate.total_years_experience, job.min_years, job.max_years);
    let education = education_score(candidate.education_level, job.education_level);
    let location = location_score(
        candidate.location.as_deref(),
        job.location.as_deref(),
        job.remote_ok,
    );

    let overall = round2(
        skills.score * SKILL_WEIGHT
            + experience * EXPERIENCE_WEIGHT
            + education * EDUCATION_WEIGHT
            + location * LOCATION_WEIGHT,
    );

    MatchScore {
        overall,
        skill: skills.score,
        experience,
        education,
        location,
        matching_skills: skills.matching,
        missing_skills: skills.missing,
    }
}

fn band(score: f64) -> &'static str {
    match score {
        s if s >= 80.0 => "strong",
        s if s >= 60.0 => "good",
        s if s >= 40.0 => "partial",
        _ => "weak",
    }
}

/// Human-readable summary built from the sub-score bands and skill sets.
pub fn explain(score: &MatchScore) -> String {
    let mut parts = vec![format!(
        "Overall {} match ({:.0}/100).",
        band(score.overall),
        score.overall
    )];

    let mut skills = format!("Skills: {} ({:.0})", band(score.skill), score.skill);
    if !score.matching_skills.is_empty() {
        skills.push_str(&format!("; has {}", score.matching_skills.join(", ")));
    }
    if !score.missing_skills.is_empty() {
        skills.push_str(&format!("; missing {}", score.missing_skills.join(", ")));
    }
    skills.push('.');
    parts.push(skills);

    parts.push(format!(
        "Experience: {} ({:.0}). Education: {} ({:.0}). Location: {} ({:.0}).",
        band(score.experience),
        score.experience,
        band(score.education),
        score.education,
        band(score.location),
        score.location
    ));
    parts.join(" ")
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    pub(crate) fn candidate(skills: &[&str]) -> CandidateProfile {
        CandidateProfile {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            owner_recruiter_id: None,
            resume_id: Uuid::new_v4(),
            name: Some("Jane Doe".into()),
            email: Some("jane@example.com".into()),
            phone: None,
            location: Some("Austin, TX".into()),
            skills: strings(skills),
            total_years_experience: Some(5.0),
            education_level: Some(3),
            summary: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn posting(required: &[&str], preferred: &[&str]) -> JobPosting {
        JobPosting {
            id: Uuid::new_v4(),
            recruiter_id: Uuid::new_v4(),
            title: "Full Stack Engineer".into(),
            required_skills: strings(required),
            preferred_skills: strings(preferred),
            min_years: Some(3.0),
            max_years: Some(8.0),
            education_level: Some(3),
            location: Some("Austin, TX".into()),
            remote_ok: false,
            is_active: true,
        }
    }

    #[test]
    fn test_skill_score_required_and_preferred() {
        let overlap = skill_score(
            &strings(&["Python", "React", "AWS"]),
            &strings(&["Python", "React", "PostgreSQL"]),
            &strings(&["AWS"]),
        );
        assert_eq!(overlap.score, 71.67);
        assert_eq!(overlap.matching, strings(&["Python", "React", "AWS"]));
        assert_eq!(overlap.missing, strings(&["PostgreSQL"]));
    }

    #[test]
    fn test_skill_score_is_case_and_alias_insensitive() {
        let overlap = skill_score(&strings(&["python", "ReactJS"]), &strings(&["Python", "React"]), &[]);
        assert_eq!(overlap.score, 100.0);
        assert!(overlap.missing.is_empty());
    }

    #[test]
    fn test_preferred_bonus_capped_and_total_clamped() {
        let have = strings(&["Go", "Rust", "Docker", "Kubernetes", "Redis", "Kafka", "Python"]);
        let overlap = skill_score(
            &have,
            &strings(&["Python"]),
            &strings(&["Go", "Rust", "Docker", "Kubernetes", "Redis", "Kafka"]),
        );
        assert_eq!(overlap.score, 100.0);

        let partial = skill_score(
            &have,
            &strings(&["Python", "Java"]),
            &strings(&["Go", "Rust", "Docker", "Kubernetes", "Redis", "Kafka"]),
        );
        // 50 + min(30, 20)
        assert_eq!(partial.score, 70.0);
    }

    #[test]
    fn test_experience_bands() {
        assert_eq!(experience_score(Some(5.0), Some(3.0), Some(8.0)), 100.0);
        assert_eq!(experience_score(Some(1.0), Some(3.0), None), 80.0);
        assert_eq!(experience_score(Some(0.0), Some(15.0), None), 0.0);
        assert_eq!(experience_score(Some(12.0), None, Some(8.0)), 92.0);
        assert_eq!(experience_score(Some(30.0), None, Some(8.0)), 80.0);
        assert_eq!(experience_score(None, Some(3.0), None), 50.0);
        assert_eq!(experience_score(None, None, None), 100.0);
    }

    #[test]
    fn test_education_bands() {
        assert_eq!(education_score(Some(4), Some(3)), 100.0);
        assert_eq!(education_score(Some(3), Some(3)), 100.0);
        assert_eq!(education_score(Some(2), Some(3)), 75.0);
        assert_eq!(education_score(Some(1), Some(3)), 50.0);
        assert_eq!(education_score(None, Some(3)), 50.0);
        assert_eq!(education_score(None, None), 100.0);
    }

    #[test]
    fn test_location_bands() {
        assert_eq!(location_score(Some("Berlin"), Some("Austin, TX"), true), 100.0);
        assert_eq!(location_score(Some("austin, tx"), Some("Austin, TX"), false), 100.0);
        assert_eq!(location_score(Some("Dallas, TX"), Some("Austin, TX"), false), 75.0);
        assert_eq!(location_score(Some("Berlin"), Some("Austin, TX"), false), 25.0);
        assert_eq!(location_score(None, Some("Austin, TX"), false), 50.0);
        assert_eq!(location_score(Some("Austin"), Some("  "), false), 50.0);
    }

    #[test]
    fn test_degree_levels() {
        assert_eq!(degree_level("Ph.D. in Physics"), Some(5));
        assert_eq!(degree_level("Doctor of Philosophy"), Some(5));
        assert_eq!(degree_level("M.Sc. Computer Science"), Some(4));
        assert_eq!(degree_level("Master of Business Administration"), Some(4));
        assert_eq!(degree_level("MBA"), Some(4));
        assert_eq!(degree_level("B.S. Computer Science"), Some(3));
        assert_eq!(degree_level("Bachelor of Arts"), Some(3));
        assert_eq!(degree_level("Associate of Science"), Some(2));
        assert_eq!(degree_level("High School Diploma"), Some(1));
        assert_eq!(degree_level("Bootcamp certificate"), None);
    }

    #[test]
    fn test_highest_degree_level_wins() {
        let education = vec![
            Education { degree: Some("B.S. Mathematics".into()), ..Default::default() },
            Education { degree: Some("Master of Science".into()), ..Default::default() },
            Education { degree: None, ..Default::default() },
        ];
        assert_eq!(highest_degree_level(&education), Some(4));
        assert_eq!(highest_degree_level(&[]), None);
    }

    #[test]
    fn test_score_match_weighted_sum() {
        let c = candidate(&["Python", "React", "AWS"]);
        let j = posting(&["Python", "React", "PostgreSQL"], &["AWS"]);
        let score = score_match(&c, &j);

        assert_eq!(score.skill, 71.67);
        assert_eq!(score.experience, 100.0);
        assert_eq!(score.education, 100.0);
        assert_eq!(score.location, 100.0);
        // 71.67·0.5 + 100·0.25 + 100·0.15 + 100·0.10
        assert!((score.overall - 85.835).abs() < 0.01, "got {}", score.overall);
        assert!(score.is_persistable());
    }

    #[test]
    fn test_poor_fit_is_not_persistable() {
        let mut c = candidate(&["Excel"]);
        c.total_years_experience = Some(0.0);
        c.education_level = Some(1);
        c.location = Some("Berlin".into());
        let mut j = posting(&["Rust", "Kubernetes"], &[]);
        j.min_years = Some(10.0);
        j.education_level = Some(5);

        let score = score_match(&c, &j);
        assert!(score.overall < MATCH_THRESHOLD, "got {}", score.overall);
        assert!(!score.is_persistable());
    }

    #[test]
    fn test_explanation_mentions_skill_sets() {
        let c = candidate(&["Python", "React", "AWS"]);
        let j = posting(&["Python", "React", "PostgreSQL"], &["AWS"]);
        let text = explain(&score_match(&c, &j));
        assert!(text.starts_with("Overall strong match"));
        assert!(text.contains("has Python, React, AWS"));
        assert!(text.contains("missing PostgreSQL"));
    }
}
