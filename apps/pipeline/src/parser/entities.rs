//! Entity extraction: regex for contact details, optional NER sidecar for the rest.
//!
//! Emails, phones and URLs are always taken from regexes because statistical
//! NER is unreliable on them. Persons, organizations, locations and dates come
//! from the NER backend when one is configured and reachable; otherwise dates
//! fall back to a regex and the other three stay empty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use phonenumber::country;
use phonenumber::Mode;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm_client::truncate_chars;

/// NER reads at most this many characters.
pub const NER_MAX_CHARS: usize = 10_000;
const NER_THRESHOLD: f32 = 0.5;
const NER_TIMEOUT_SECS: u64 = 30;
const NER_LABELS: [&str; 4] = ["person", "organization", "location", "date"];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("valid email regex")
});

static STRICT_EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9](?:[A-Z0-9-]*[A-Z0-9])?(?:\.[A-Z0-9](?:[A-Z0-9-]*[A-Z0-9])?)*\.[A-Z]{2,}$")
        .expect("valid strict email regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\(?\d[\d \t().\-]{6,}\d").expect("valid phone regex"));

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:https?://[^\s<>()]+|www\.[^\s<>()]+|(?:[a-z]{2,3}\.)?linkedin\.com/[^\s<>()]+|github\.com/[^\s<>()]+)",
    )
    .expect("valid url regex")
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+(?:19|20)\d{2}|(?:0?[1-9]|1[0-2])/(?:19|20)\d{2}|(?:19|20)\d{2}\s*[-–]\s*(?:(?:19|20)\d{2}|present|current))\b",
    )
    .expect("valid date regex")
});

/// Deduplicated entity lists keyed by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMap {
    pub persons: Vec<String>,
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
    pub dates: Vec<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub urls: Vec<String>,
}

impl EntityMap {
    pub fn first_url_containing(&self, needle: &str) -> Option<&str> {
        self.urls
            .iter()
            .map(String::as_str)
            .find(|u| u.to_ascii_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone)]
pub struct EntityExtraction {
    pub entities: EntityMap,
    pub ner_used: bool,
}

/// Standard email syntax check used before any email reaches a record.
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && !email.contains("..") && STRICT_EMAIL_RE.is_match(email)
}

/// Appends `value` unless an entry already matches case-insensitively.
fn push_unique(list: &mut Vec<String>, seen: &mut HashSet<String>, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }
    if seen.insert(value.to_lowercase()) {
        list.push(value.to_string());
    }
}

fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for v in values {
        push_unique(&mut out, &mut seen, &v);
    }
    out
}

pub fn extract_emails(text: &str) -> Vec<String> {
    dedup(
        EMAIL_RE
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|e| is_valid_email(e)),
    )
}

/// Phone candidates validated by libphonenumber and normalised to
/// international format. Invalid numbers are dropped.
pub fn extract_phones(text: &str, default_region: Option<country::Id>) -> Vec<String> {
    dedup(PHONE_RE.find_iter(text).filter_map(|m| {
        let raw = m.as_str().trim();
        let number = phonenumber::parse(default_region, raw).ok()?;
        phonenumber::is_valid(&number)
            .then(|| number.format().mode(Mode::International).to_string())
    }))
}

pub fn extract_urls(text: &str) -> Vec<String> {
    dedup(URL_RE.find_iter(text).map(|m| {
        m.as_str()
            .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | ')' | '|' | '"' | '\''))
            .to_string()
    }))
}

pub fn extract_dates(text: &str) -> Vec<String> {
    dedup(DATE_RE.find_iter(text).map(|m| m.as_str().to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// NER backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerEntity {
    pub text: String,
    pub label: String,
    pub score: f32,
    #[serde(default)]
    pub start: usize,
    #[serde(default)]
    pub end: usize,
}

#[async_trait]
pub trait NerBackend: Send + Sync {
    async fn extract(
        &self,
        text: &str,
        labels: &[&str],
        threshold: f32,
    ) -> Result<Vec<NerEntity>, String>;
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
    entity_types: &'a [&'a str],
    threshold: f32,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    entities: Vec<NerEntity>,
}

/// NER sidecar speaking `POST {base}/extract`.
pub struct HttpNerBackend {
    client: Client,
    base_url: String,
}

impl HttpNerBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(NER_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NerBackend for HttpNerBackend {
    async fn extract(
        &self,
        text: &str,
        labels: &[&str],
        threshold: f32,
    ) -> Result<Vec<NerEntity>, String> {
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&ExtractRequest {
                text,
                entity_types: labels,
                threshold,
            })
            .send()
            .await
            .map_err(|e| format!("NER request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("NER sidecar returned {status}"));
        }
        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| format!("NER response unreadable: {e}"))?;
        Ok(body.entities)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extractor
// ────────────────────────────────────────────────────────────────────────────

pub struct EntityExtractor {
    ner: Option<Arc<dyn NerBackend>>,
    default_region: Option<country::Id>,
}

impl EntityExtractor {
    /// `default_region` is an ISO 3166 alpha-2 code used for numbers
    /// written without a country prefix. Unknown codes disable the default.
    pub fn new(ner: Option<Arc<dyn NerBackend>>, default_region: &str) -> Self {
        let region = default_region.trim().to_ascii_uppercase().parse::<country::Id>().ok();
        if region.is_none() {
            warn!(default_region, "Unknown phone region; national numbers will be dropped");
        }
        Self {
            ner,
            default_region: region,
        }
    }

    /// Never fails: NER problems degrade to regex-only extraction.
    pub async fn extract(&self, text: &str) -> EntityExtraction {
        let mut entities = EntityMap {
            emails: extract_emails(text),
            phones: extract_phones(text, self.default_region),
            urls: extract_urls(text),
            ..Default::default()
        };

        let ner_used = match &self.ner {
            Some(ner) => {
                let window = truncate_chars(text, NER_MAX_CHARS);
                match ner.extract(window, &NER_LABELS, NER_THRESHOLD).await {
                    Ok(found) => {
                        merge_ner(&mut entities, found);
                        true
                    }
                    Err(e) => {
                        warn!("NER unavailable, using regex-only entities: {e}");
                        false
                    }
                }
            }
            None => false,
        };

        if !ner_used || entities.dates.is_empty() {
            entities.dates = extract_dates(text);
        }

        debug!(
            ner_used,
            emails = entities.emails.len(),
            phones = entities.phones.len(),
            persons = entities.persons.len(),
            "Entities extracted"
        );
        EntityExtraction { entities, ner_used }
    }
}

fn merge_ner(entities: &mut EntityMap, found: Vec<NerEntity>) {
    let mut persons = Vec::new();
    let mut organizations = Vec::new();
    let mut locations = Vec::new();
    let mut dates = Vec::new();

    for entity in found {
        match entity.label.to_ascii_lowercase().as_str() {
            "person" => persons.push(entity.text),
            "organization" | "org" => organizations.push(entity.text),
            "location" | "loc" | "gpe" => locations.push(entity.text),
            "date" => dates.push(entity.text),
            _ => {}
        }
    }

    entities.persons = dedup(persons);
    entities.organizations = dedup(organizations);
    entities.locations = dedup(locations);
    entities.dates = dedup(dates);
}
