//! LLM Structurer: turns raw resume text plus entities into a [`ResumeData`].
//!
//! The LLM is the preferred extractor. Any failure (no client configured,
//! transport error, invalid JSON, schema mismatch) falls back to a rule-based
//! skeleton built from the entity map and the skill vocabulary, and the
//! result is flagged as degraded.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm_client::{truncate_chars, ChatModel};
use crate::models::resume_data::{Experience, PersonalInfo, ResumeData, Skill};
use crate::parser::entities::{is_valid_email, EntityMap};
use crate::parser::prompts::{
    structure_system, EXAMPLES_HEADER, EXAMPLE_EXCERPT_CHARS, EXAMPLE_TEMPLATE,
    PROMPT_TEXT_CHARS, STRUCTURE_PROMPT_TEMPLATE,
};
use crate::parser::vocabulary::{canonical_name, keyword_scan};

pub const LLM_DEGRADED_WARNING: &str = "LLM enhancement failed";

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex"));

static MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?|\b(0?[1-9]|1[0-2])/")
        .expect("valid month regex")
});

/// A recruiter-verified record of a similar resume, used as a prompt exemplar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    pub raw_text: String,
    pub structured: ResumeData,
    pub similarity: f32,
}

/// Outcome of structuring. `Degraded` always carries a usable record.
#[derive(Debug, Clone)]
pub enum Structured {
    Parsed(ResumeData),
    Degraded { data: ResumeData, reason: String },
}

impl Structured {
    pub fn llm_used(&self) -> bool {
        matches!(self, Structured::Parsed(_))
    }

    pub fn into_data(self) -> ResumeData {
        match self {
            Structured::Parsed(data) | Structured::Degraded { data, .. } => data,
        }
    }
}

pub struct Structurer {
    llm: Option<Arc<dyn ChatModel>>,
}

impl Structurer {
    pub fn new(llm: Option<Arc<dyn ChatModel>>) -> Self {
        Self { llm }
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    pub async fn structure(
        &self,
        text: &str,
        entities: &EntityMap,
        examples: &[FewShotExample],
    ) -> Structured {
        let Some(llm) = &self.llm else {
            debug!("No LLM configured; using rule-based skeleton");
            return Structured::Degraded {
                data: rule_based_skeleton(text, entities),
                reason: "LLM client not configured".to_string(),
            };
        };

        let prompt = build_prompt(text, entities, examples);
        let result = llm
            .complete_json(&structure_system(), &prompt)
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| {
                serde_json::from_value::<ResumeData>(value)
                    .map_err(|e| format!("response did not match the resume schema: {e}"))
            });

        match result {
            Ok(data) => {
                debug!(model = llm.model_name(), skills = data.skills.len(), "LLM structuring succeeded");
                Structured::Parsed(data)
            }
            Err(reason) => {
                warn!(model = llm.model_name(), "LLM structuring failed, degrading: {reason}");
                Structured::Degraded {
                    data: rule_based_skeleton(text, entities),
                    reason,
                }
            }
        }
    }
}

pub fn build_prompt(text: &str, entities: &EntityMap, examples: &[FewShotExample]) -> String {
    let entities_json = serde_json::to_string_pretty(entities).unwrap_or_else(|_| "{}".into());

    let examples_block = if examples.is_empty() {
        String::new()
    } else {
        let rendered: Vec<String> = examples
            .iter()
            .enumerate()
            .map(|(i, ex)| {
                let structured = serde_json::to_string(&ex.structured.without_derived())
                    .unwrap_or_else(|_| "{}".into());
                fill_template(
                    EXAMPLE_TEMPLATE,
                    &[
                        ("n", (i + 1).to_string().as_str()),
                        ("excerpt", truncate_chars(&ex.raw_text, EXAMPLE_EXCERPT_CHARS)),
                        ("structured", structured.as_str()),
                    ],
                )
            })
            .collect();
        format!("{EXAMPLES_HEADER}{}", rendered.join("\n"))
    };

    fill_template(
        STRUCTURE_PROMPT_TEMPLATE,
        &[
            ("entities", entities_json.as_str()),
            ("examples", examples_block.as_str()),
            ("resume_text", truncate_chars(text, PROMPT_TEXT_CHARS)),
        ],
    )
}

/// Fills `{key}` placeholders in a single pass, so braces inside substituted
/// values are never read as placeholders. Unknown `{...}` is kept verbatim.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_brace = &rest[open + 1..];
        let hit = values.iter().find_map(|(key, value)| {
            let tail = after_brace.strip_prefix(key)?.strip_prefix('}')?;
            Some((*value, tail))
        });
        match hit {
            Some((value, tail)) => {
                out.push_str(value);
                rest = tail;
            }
            None => {
                out.push('{');
                rest = after_brace;
            }
        }
    }
    out.push_str(rest);
    out
}

// ────────────────────────────────────────────────────────────────────────────
// Rule-based fallback
// ────────────────────────────────────────────────────────────────────────────

/// Personal info from entities, skills from the vocabulary, nothing else.
pub fn rule_based_skeleton(text: &str, entities: &EntityMap) -> ResumeData {
    let skills = keyword_scan(text)
        .into_iter()
        .map(|entry| Skill::named(entry.name, entry.category))
        .collect();

    ResumeData {
        personal_info: PersonalInfo {
            name: entities
                .persons
                .first()
                .cloned()
                .or_else(|| name_from_first_line(text)),
            location: entities.locations.first().cloned(),
            ..Default::default()
        },
        skills,
        ..Default::default()
    }
}

/// Resumes usually open with the candidate's name on its own line.
fn name_from_first_line(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let words: Vec<&str> = line.split_whitespace().collect();
    let plausible = (2..=4).contains(&words.len())
        && words.iter().all(|w| {
            w.chars().next().is_some_and(char::is_uppercase)
                && w.chars().all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == '.')
        });
    plausible.then(|| line.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Post-validation
// ────────────────────────────────────────────────────────────────────────────

/// Re-checks the record after structuring: invalid emails are dropped,
/// missing contact fields are filled from entities, skills are de-duplicated
/// and total experience is derived when absent.
pub fn post_validate(mut data: ResumeData, entities: &EntityMap, raw_text: &str) -> ResumeData {
    let info = &mut data.personal_info;

    info.email = info
        .email
        .take()
        .map(|e| e.trim().to_string())
        .filter(|e| {
            let ok = is_valid_email(e);
            if !ok {
                debug!(email = %e, "Dropping invalid email");
            }
            ok
        })
        .or_else(|| entities.emails.iter().find(|e| is_valid_email(e)).cloned());

    if blank(&info.phone) {
        info.phone = entities.phones.first().cloned();
    }
    if blank(&info.linkedin) {
        info.linkedin = entities.first_url_containing("linkedin").map(str::to_string);
    }
    if blank(&info.github) {
        info.github = entities.first_url_containing("github").map(str::to_string);
    }
    if blank(&info.name) {
        info.name = entities.persons.first().cloned();
    }

    let mut seen = std::collections::HashSet::new();
    data.skills.retain_mut(|skill| {
        skill.name = canonical_name(&skill.name);
        !skill.name.is_empty() && seen.insert(skill.name.to_lowercase())
    });

    if data.total_years_experience.is_none() {
        data.total_years_experience = derive_total_years(&data.experience, Utc::now().date_naive());
    }

    data.raw_text = raw_text.to_string();
    data
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Month index (0-11) and year of a date string such as "Jan 2020", "03/2019"
/// or "2018". Strings meaning "now" resolve to `today`.
fn parse_point(raw: &str, today: NaiveDate) -> Option<f64> {
    let lower = raw.trim().to_lowercase();
    if matches!(lower.as_str(), "present" | "current" | "now" | "today") {
        return Some(today.year() as f64 + today.month0() as f64 / 12.0);
    }
    let year: f64 = YEAR_RE.find(&lower)?.as_str().parse().ok()?;
    let month = MONTH_RE.captures(&lower).and_then(|c| {
        if let Some(name) = c.get(1) {
            ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"]
                .iter()
                .position(|m| *m == name.as_str())
        } else {
            c.get(2)?.as_str().parse::<usize>().ok().map(|m| m - 1)
        }
    });
    Some(year + month.unwrap_or(0) as f64 / 12.0)
}

/// Sum of experience intervals in years, overlaps merged, one decimal.
pub fn derive_total_years(experience: &[Experience], today: NaiveDate) -> Option<f64> {
    let mut intervals: Vec<(f64, f64)> = experience
        .iter()
        .filter_map(|role| {
            let start = parse_point(role.start_date.as_deref()?, today)?;
            let end = match role.end_date.as_deref() {
                Some(end) => parse_point(end, today)?,
                None if role.current => parse_point("present", today)?,
                None => return None,
            };
            (end >= start).then_some((start, end))
        })
        .collect();
    if intervals.is_empty() {
        return None;
    }

    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut total = 0.0;
    let (mut cur_start, mut cur_end) = intervals[0];
    for &(start, end) in &intervals[1..] {
        if start <= cur_end {
            cur_end = cur_end.max(end);
        } else {
            total += cur_end - cur_start;
            cur_start = start;
            cur_end = end;
        }
    }
    total += cur_end - cur_start;
    Some((total * 10.0).round() / 10.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm_client::LlmError;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Chat model returning a canned reply and recording prompts.
    pub(crate) struct ScriptedModel {
        pub reply: Result<Value, String>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub(crate) fn replying(value: Value) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(value),
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub(crate) fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("connection refused".into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete_json(&self, _system: &str, user: &str) -> Result<Value, LlmError> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.reply.clone().map_err(|message| LlmError::Api {
                status: 503,
                message,
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn entities() -> EntityMap {
        EntityMap {
            persons: vec!["John Doe".into()],
            emails: vec!["john.doe@example.com".into()],
            phones: vec!["+1 650-253-0000".into()],
            urls: vec!["https://linkedin.com/in/jdoe".into()],
            ..Default::default()
        }
    }

    const TEXT: &str = "John Doe\njohn.doe@example.com\nSkills: Python, React, PostgreSQL";

    #[tokio::test]
    async fn test_llm_reply_is_parsed() {
        let model = ScriptedModel::replying(json!({
            "personal_info": {"name": "John Doe", "email": "john.doe@example.com"},
            "skills": [{"name": "Python", "category": "programming"}],
            "experience": [{"title": "Engineer", "company": "Acme", "current": true}]
        }));
        let structurer = Structurer::new(Some(model.clone() as Arc<dyn ChatModel>));
        let out = structurer.structure(TEXT, &entities(), &[]).await;

        assert!(out.llm_used());
        let data = out.into_data();
        assert_eq!(data.experience.len(), 1);
        assert_eq!(data.skills[0].name, "Python");
        let prompt = &model.prompts.lock().unwrap()[0];
        assert!(prompt.contains("john.doe@example.com"));
        assert!(prompt.contains("Skills: Python"));
    }

    #[tokio::test]
    async fn test_unreachable_llm_degrades_to_skeleton() {
        let structurer = Structurer::new(Some(ScriptedModel::unreachable()));
        let out = structurer.structure(TEXT, &entities(), &[]).await;

        let Structured::Degraded { data, reason } = out else {
            panic!("expected degraded output");
        };
        assert!(reason.contains("connection refused"));
        assert_eq!(data.personal_info.name.as_deref(), Some("John Doe"));
        assert!(data.experience.is_empty());
        let names = data.skill_names();
        for skill in ["Python", "React", "PostgreSQL"] {
            assert!(names.contains(&skill.to_string()), "missing {skill}");
        }
    }

    #[tokio::test]
    async fn test_schema_mismatch_degrades() {
        let structurer = Structurer::new(Some(ScriptedModel::replying(json!({"skills": "Python"}))));
        let out = structurer.structure(TEXT, &entities(), &[]).await;
        assert!(!out.llm_used());
    }

    #[tokio::test]
    async fn test_llm_reply_with_nulls_is_still_parsed() {
        let model = ScriptedModel::replying(json!({
            "personal_info": {"name": "John Doe", "email": null},
            "summary": null,
            "skills": [{"name": "Python", "category": null, "proficiency": null}],
            "experience": [{"title": "Engineer", "current": null, "achievements": null}],
            "education": null,
            "certifications": null
        }));
        let structurer = Structurer::new(Some(model as Arc<dyn ChatModel>));
        let out = structurer.structure(TEXT, &entities(), &[]).await;

        assert!(out.llm_used());
        let data = out.into_data();
        assert_eq!(data.experience[0].title.as_deref(), Some("Engineer"));
        assert!(!data.experience[0].current);
        assert_eq!(data.skills[0].name, "Python");
        assert!(data.education.is_empty());
    }

    #[tokio::test]
    async fn test_missing_client_degrades() {
        let out = Structurer::new(None).structure(TEXT, &entities(), &[]).await;
        assert!(matches!(out, Structured::Degraded { .. }));
    }

    #[test]
    fn test_prompt_includes_examples_and_truncates_text() {
        let long = "a".repeat(PROMPT_TEXT_CHARS + 100);
        let example = FewShotExample {
            raw_text: "Jane Roe, Rust engineer".into(),
            structured: ResumeData {
                summary: Some("Rust engineer".into()),
                raw_text: "should not appear".into(),
                ..Default::default()
            },
            similarity: 0.93,
        };
        let prompt = build_prompt(&long, &EntityMap::default(), &[example]);
        assert!(prompt.contains("Example 1 (verified)"));
        assert!(prompt.contains("Jane Roe, Rust engineer"));
        assert!(!prompt.contains("should not appear"));
        assert!(!prompt.contains(&"a".repeat(PROMPT_TEXT_CHARS + 1)));
    }

    #[test]
    fn test_placeholder_text_in_values_is_not_substituted() {
        let entities = EntityMap {
            urls: vec!["https://example.com/{resume_text}".into()],
            ..Default::default()
        };
        let text = "Notes: {entities} and {examples} are literal here";
        let prompt = build_prompt(text, &entities, &[]);
        assert!(prompt.contains("https://example.com/{resume_text}"));
        assert!(prompt.contains(text));
        assert_eq!(prompt.matches(text).count(), 1);
    }

    #[test]
    fn test_fill_template_keeps_unknown_braces() {
        let out = fill_template(r#"{"a": {x}} {y"#, &[("x", "{y}")]);
        assert_eq!(out, r#"{"a": {y}} {y"#);
    }

    #[test]
    fn test_skeleton_name_falls_back_to_first_line() {
        let data = rule_based_skeleton("Maria Garcia\nData Engineer", &EntityMap::default());
        assert_eq!(data.personal_info.name.as_deref(), Some("Maria Garcia"));
        let data = rule_based_skeleton("CURRICULUM VITAE 2024", &EntityMap::default());
        assert_eq!(data.personal_info.name, None);
    }

    #[test]
    fn test_post_validate_drops_invalid_email_for_entity_email() {
        let data = ResumeData {
            personal_info: PersonalInfo {
                email: Some("john.doe@@example".into()),
                ..Default::default()
            },
            skills: vec![
                Skill::named("postgres", Default::default()),
                Skill::named("PostgreSQL", Default::default()),
                Skill::named("  ", Default::default()),
            ],
            ..Default::default()
        };
        let out = post_validate(data, &entities(), TEXT);
        assert_eq!(out.personal_info.email.as_deref(), Some("john.doe@example.com"));
        assert_eq!(out.personal_info.phone.as_deref(), Some("+1 650-253-0000"));
        assert_eq!(out.personal_info.linkedin.as_deref(), Some("https://linkedin.com/in/jdoe"));
        assert_eq!(out.skill_names(), vec!["PostgreSQL"]);
        assert_eq!(out.raw_text, TEXT);
    }

    #[test]
    fn test_post_validate_without_valid_email_leaves_none() {
        let data = ResumeData {
            personal_info: PersonalInfo {
                email: Some("not-an-email".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let out = post_validate(data, &EntityMap::default(), "");
        assert_eq!(out.personal_info.email, None);
    }

    #[test]
    fn test_derive_total_years_merges_overlaps() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let role = |start: &str, end: Option<&str>, current: bool| Experience {
            start_date: Some(start.into()),
            end_date: end.map(str::to_string),
            current,
            ..Default::default()
        };
        let experience = vec![
            role("Jan 2020", None, true),
            role("Jan 2018", Some("Jan 2021"), false),
            role("2010", Some("2012"), false),
        ];
        // 2018-01 .. 2024-01 merged (6.0) + 2010 .. 2012 (2.0)
        assert_eq!(derive_total_years(&experience, today), Some(8.0));
        assert_eq!(derive_total_years(&[], today), None);
    }

    #[test]
    fn test_parse_point_handles_numeric_months() {
        let today = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        assert_eq!(parse_point("07/2020", today), Some(2020.5));
        assert_eq!(parse_point("Present", today), Some(2024.5));
        assert_eq!(parse_point("unknown", today), None);
    }
}
