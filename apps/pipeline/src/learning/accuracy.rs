//! Field-weighted comparison of a parsed record against a recruiter's
//! correction.
//!
//! - each personal-info field present on either side counts once
//! - skills count once per skill in the corrected set
//! - experience and education count once each, correct when the list
//!   lengths agree

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::json;

use crate::models::learning::FieldCorrection;
use crate::models::resume_data::ResumeData;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// `correct_fields / compared_fields`, 1.0 when nothing was compared.
    pub accuracy: f64,
    pub compared_fields: usize,
    pub correct_fields: usize,
    /// Keyed by dotted field path, e.g. `personal_info.email`.
    pub corrections: BTreeMap<String, FieldCorrection>,
}

impl AccuracyReport {
    fn perfect() -> Self {
        Self {
            accuracy: 1.0,
            compared_fields: 0,
            correct_fields: 0,
            corrections: BTreeMap::new(),
        }
    }
}

fn normalize(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|v| !v.is_empty())
}

fn skill_set(data: &ResumeData) -> BTreeSet<String> {
    data.skills
        .iter()
        .map(|s| s.name.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn compute_accuracy(original: &ResumeData, corrected: &ResumeData) -> AccuracyReport {
    if *corrected == ResumeData::default() || original == corrected {
        return AccuracyReport::perfect();
    }

    let mut compared = 0usize;
    let mut correct = 0usize;
    let mut corrections = BTreeMap::new();

    for ((field, before), (_, after)) in original
        .personal_info
        .fields()
        .into_iter()
        .zip(corrected.personal_info.fields())
    {
        let (a, b) = (normalize(before), normalize(after));
        if a.is_none() && b.is_none() {
            continue;
        }
        compared += 1;
        if a == b {
            correct += 1;
        } else {
            corrections.insert(
                format!("personal_info.{field}"),
                FieldCorrection {
                    original: json!(before),
                    corrected: json!(after),
                },
            );
        }
    }

    let before_skills = skill_set(original);
    let after_skills = skill_set(corrected);
    compared += after_skills.len();
    correct += after_skills.intersection(&before_skills).count();
    if before_skills != after_skills {
        corrections.insert(
            "skills".to_string(),
            FieldCorrection {
                original: json!(original.skill_names()),
                corrected: json!(corrected.skill_names()),
            },
        );
    }

    compared += 2;
    if original.experience.len() == corrected.experience.len() {
        correct += 1;
    }
    if original.education.len() == corrected.education.len() {
        correct += 1;
    }
    if original.experience != corrected.experience {
        corrections.insert(
            "experience".to_string(),
            FieldCorrection {
                original: json!(original.experience),
                corrected: json!(corrected.experience),
            },
        );
    }
    if original.education != corrected.education {
        corrections.insert(
            "education".to_string(),
            FieldCorrection {
                original: json!(original.education),
                corrected: json!(corrected.education),
            },
        );
    }

    AccuracyReport {
        accuracy: correct as f64 / compared as f64,
        compared_fields: compared,
        correct_fields: correct,
        corrections,
    }
}
