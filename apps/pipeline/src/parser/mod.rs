//! Parser Orchestrator: the public entry point for turning one resume file
//! into a structured record.
//!
//! validate file → extract text → extract entities → structure (LLM or
//! skeleton) → post-validate and rank skills → metadata.
//!
//! [`ResumeParser::parse`] never returns an error: every failure is folded
//! into a [`ParseResult`] so the job runner can decide between retry and a
//! terminal failure.

pub mod entities;
pub mod prompts;
pub mod skill_ranker;
pub mod structurer;
pub mod text_extractor;
pub mod vocabulary;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::models::resume_data::{ParseMetadata, ResumeData};
use crate::parser::entities::{EntityExtractor, EntityMap};
use crate::parser::skill_ranker::SkillRanker;
use crate::parser::structurer::{post_validate, FewShotExample, Structured, Structurer};
use crate::parser::text_extractor::{
    validate_file, ExtractionError, TextExtractor, MIN_TEXT_CHARS,
};

pub use crate::parser::structurer::LLM_DEGRADED_WARNING;

pub const PARSER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    FileValidationError,
    TextExtractionError,
    #[serde(rename = "LLMEnhancementError")]
    LlmEnhancementError,
    ResumeParsingError,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::FileValidationError => "FileValidationError",
            ParseErrorKind::TextExtractionError => "TextExtractionError",
            ParseErrorKind::LlmEnhancementError => "LLMEnhancementError",
            ParseErrorKind::ResumeParsingError => "ResumeParsingError",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseErrorDetail {
    pub kind: ParseErrorKind,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseResult {
    pub success: bool,
    pub data: Option<ResumeData>,
    /// Codes of the failures that stopped the parse, e.g. `InsufficientText`.
    pub errors: Vec<String>,
    /// Every failure seen, including non-fatal LLM degradation.
    pub error_details: Vec<ParseErrorDetail>,
    pub warnings: Vec<String>,
    pub metadata: ParseMetadata,
}

/// The three shapes a parse can take.
#[derive(Debug, Clone)]
pub enum ParseOutcome {
    Parsed(ResumeData),
    Degraded {
        data: ResumeData,
        warnings: Vec<String>,
    },
    Failed {
        errors: Vec<ParseErrorDetail>,
    },
}

impl ParseResult {
    pub fn outcome(self) -> ParseOutcome {
        match self.data {
            Some(data) if self.success && self.warnings.is_empty() => ParseOutcome::Parsed(data),
            Some(data) if self.success => ParseOutcome::Degraded {
                data,
                warnings: self.warnings,
            },
            _ => ParseOutcome::Failed {
                errors: self.error_details,
            },
        }
    }

    /// Kind of the failure that stopped the parse.
    pub fn failure_kind(&self) -> Option<ParseErrorKind> {
        if self.success {
            return None;
        }
        self.error_details
            .iter()
            .rev()
            .map(|d| d.kind)
            .find(|k| *k != ParseErrorKind::LlmEnhancementError)
    }

    /// Human-readable reason for a failed parse.
    pub fn failure_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        self.error_details
            .iter()
            .rev()
            .find(|d| d.kind != ParseErrorKind::LlmEnhancementError)
            .map(|d| format!("{}: {}", d.code, d.message))
    }
}

/// Supplies verified exemplars for the structuring prompt.
#[async_trait]
pub trait ExampleProvider: Send + Sync {
    /// Must not fail; an unavailable provider returns no examples.
    async fn similar_examples(&self, text: &str, k: usize) -> Vec<FewShotExample>;
}

pub struct ResumeParser {
    extractor: TextExtractor,
    entities: EntityExtractor,
    structurer: Structurer,
    ranker: SkillRanker,
    examples: Option<(Arc<dyn ExampleProvider>, usize)>,
}

/// Accumulates errors, warnings and metadata while a parse runs.
struct ParseRun {
    started: Instant,
    metadata: ParseMetadata,
    error_details: Vec<ParseErrorDetail>,
    warnings: Vec<String>,
}

impl ParseRun {
    fn new(file_name: &str, path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        Self {
            started: Instant::now(),
            metadata: ParseMetadata {
                file_name: file_name.to_string(),
                file_size: 0,
                extension,
                is_scanned: false,
                extraction_method: String::new(),
                parsed_at: Utc::now(),
                parsing_time_seconds: 0.0,
                parser_version: PARSER_VERSION.to_string(),
                llm_used: false,
                ner_used: false,
            },
            error_details: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn record(&mut self, kind: ParseErrorKind, code: &str, message: impl Into<String>) {
        self.error_details.push(ParseErrorDetail {
            kind,
            code: code.to_string(),
            message: message.into(),
        });
    }

    fn finish_metadata(&mut self) {
        self.metadata.parsed_at = Utc::now();
        self.metadata.parsing_time_seconds =
            (self.started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;
    }

    fn fail(mut self, kind: ParseErrorKind, code: &str, message: impl Into<String>) -> ParseResult {
        let message = message.into();
        warn!(file = %self.metadata.file_name, code, "Parse failed: {message}");
        self.record(kind, code, message);
        self.finish_metadata();
        ParseResult {
            success: false,
            data: None,
            errors: vec![code.to_string()],
            error_details: self.error_details,
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }

    fn succeed(mut self, mut data: ResumeData) -> ParseResult {
        self.finish_metadata();
        data.metadata = Some(self.metadata.clone());
        ParseResult {
            success: true,
            data: Some(data),
            errors: Vec::new(),
            error_details: self.error_details,
            warnings: self.warnings,
            metadata: self.metadata,
        }
    }
}

impl ResumeParser {
    pub fn new(extractor: TextExtractor, entities: EntityExtractor, structurer: Structurer) -> Self {
        Self {
            extractor,
            entities,
            structurer,
            ranker: SkillRanker::default(),
            examples: None,
        }
    }

    /// Enables few-shot prompting with `k` exemplars per parse.
    pub fn with_examples(mut self, provider: Arc<dyn ExampleProvider>, k: usize) -> Self {
        if k > 0 {
            self.examples = Some((provider, k));
        }
        self
    }

    pub async fn parse(&self, path: &Path) -> ParseResult {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.parse_named(path, &name).await
    }

    /// Parses `path`, reporting `file_name` in the metadata. Used when the
    /// file on disk is a temporary copy of an upload.
    pub async fn parse_named(&self, path: &Path, file_name: &str) -> ParseResult {
        let mut run = ParseRun::new(file_name, path);

        match validate_file(path) {
            Ok((_, size)) => run.metadata.file_size = size,
            Err(e) => return run.fail(ParseErrorKind::FileValidationError, e.code(), e.to_string()),
        }

        let extracted = match self.extractor.extract(path).await {
            Ok(extracted) => extracted,
            Err(e) => {
                let kind = extraction_kind(&e);
                return run.fail(kind, e.code(), e.to_string());
            }
        };
        run.metadata.is_scanned = extracted.is_scanned;
        run.metadata.extraction_method = extracted.method.clone();

        let text = extracted.text;
        let chars = text.trim().chars().count();
        if chars < MIN_TEXT_CHARS {
            let e = ExtractionError::InsufficientText {
                chars,
                min: MIN_TEXT_CHARS,
            };
            return run.fail(ParseErrorKind::TextExtractionError, e.code(), e.to_string());
        }

        let extraction = self.entities.extract(&text).await;
        run.metadata.ner_used = extraction.ner_used;

        let examples = match &self.examples {
            Some((provider, k)) if self.structurer.has_llm() => {
                provider.similar_examples(&text, *k).await
            }
            _ => Vec::new(),
        };

        let structured = self
            .structurer
            .structure(&text, &extraction.entities, &examples)
            .await;
        run.metadata.llm_used = structured.llm_used();
        if let Structured::Degraded { reason, .. } = &structured {
            run.warnings.push(LLM_DEGRADED_WARNING.to_string());
            run.record(ParseErrorKind::LlmEnhancementError, "LLMEnhancementFailed", reason.clone());
        }

        let data = match self.finalize(structured.into_data(), &extraction.entities, &text) {
            Ok(data) => data,
            Err(message) => {
                error!(file = %file_name, "Post-processing panicked: {message}");
                return run.fail(ParseErrorKind::ResumeParsingError, "ResumeParsingError", message);
            }
        };

        info!(
            file = %file_name,
            scanned = run.metadata.is_scanned,
            llm_used = run.metadata.llm_used,
            skills = data.skills.len(),
            "Resume parsed"
        );
        run.succeed(data)
    }

    /// Post-validation and ranking, with panics contained so the
    /// orchestrator still returns a result.
    fn finalize(
        &self,
        data: ResumeData,
        entities: &EntityMap,
        text: &str,
    ) -> Result<ResumeData, String> {
        catch_unwind(AssertUnwindSafe(|| {
            let mut data = post_validate(data, entities, text);
            let ranking = self.ranker.rank(text, &data.skills, &data.experience);
            data.top_technology_skills = ranking.technology;
            data.top_domain_skills = ranking.domain;
            data.ranking_metadata = Some(ranking.metadata);
            data
        }))
        .map_err(|panic| {
            panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "post-processing failed".to_string())
        })
    }
}

fn extraction_kind(e: &ExtractionError) -> ParseErrorKind {
    if e.is_validation() {
        ParseErrorKind::FileValidationError
    } else {
        ParseErrorKind::TextExtractionError
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parser::structurer::tests::ScriptedModel;
    use crate::parser::text_extractor::tests::{fixture, FixedSource};
    use crate::parser::text_extractor::TextSource;
    use serde_json::json;

    pub(crate) const S1_TEXT: &str = "John Doe\njohn.doe@example.com\n(555) 123-4567\n\
        Skills: Python, React, PostgreSQL\n\
        Software engineer building customer-facing web platforms for eight years.";

    pub(crate) fn extractor_with(pdf_text: &str, ocr_text: &str) -> TextExtractor {
        TextExtractor::new(
            vec![FixedSource::ok("pdftotext", pdf_text) as Arc<dyn TextSource>],
            Some(FixedSource::ok("tesseract", ocr_text)),
            FixedSource::ok("pandoc", pdf_text),
            FixedSource::ok("antiword", pdf_text),
        )
    }

    pub(crate) fn parser_with(pdf_text: &str, llm: Option<Arc<ScriptedModel>>) -> ResumeParser {
        ResumeParser::new(
            extractor_with(pdf_text, ""),
            EntityExtractor::new(None, "US"),
            Structurer::new(llm.map(|m| m as Arc<dyn crate::llm_client::ChatModel>)),
        )
    }

    pub(crate) fn s1_reply() -> serde_json::Value {
        json!({
            "personal_info": {"name": "John Doe", "email": "john.doe@example.com",
                              "phone": "(555) 123-4567"},
            "summary": "Software engineer",
            "skills": [
                {"name": "Python", "category": "programming"},
                {"name": "React", "category": "frontend"},
                {"name": "PostgreSQL", "category": "database"}
            ],
            "experience": [],
            "education": []
        })
    }

    #[tokio::test]
    async fn test_text_pdf_parses_with_llm() {
        let parser = parser_with(S1_TEXT, Some(ScriptedModel::replying(s1_reply())));
        let file = fixture(".pdf", &vec![b'%'; 50 * 1024]);

        let result = parser.parse(file.path()).await;
        assert!(result.success, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
        assert!(!result.metadata.is_scanned);
        assert!(result.metadata.llm_used);
        assert_eq!(result.metadata.parser_version, PARSER_VERSION);
        assert_eq!(result.metadata.file_size, 50 * 1024);
        assert_eq!(result.metadata.extension, ".pdf");

        let data = result.data.clone().unwrap();
        assert_eq!(data.personal_info.email.as_deref(), Some("john.doe@example.com"));
        let top: Vec<&str> = data.top_technology_skills.iter().map(|s| s.name.as_str()).collect();
        for skill in ["Python", "React", "PostgreSQL"] {
            assert!(top.contains(&skill));
        }
        assert!(data.top_domain_skills.is_empty());
        assert!(data.ranking_metadata.is_some());
        assert_eq!(
            data.metadata.as_ref().map(|m| m.parser_version.as_str()),
            Some(PARSER_VERSION)
        );
        assert!(matches!(result.outcome(), ParseOutcome::Parsed(_)));
    }

    #[tokio::test]
    async fn test_scanned_pdf_with_unreadable_ocr_fails() {
        let parser = ResumeParser::new(
            extractor_with(&"x".repeat(40), "noise"),
            EntityExtractor::new(None, "US"),
            Structurer::new(None),
        );
        let file = fixture(".pdf", b"%PDF-1.4");

        let result = parser.parse(file.path()).await;
        assert!(!result.success);
        assert_eq!(result.errors, vec!["InsufficientText"]);
        assert_eq!(result.failure_kind(), Some(ParseErrorKind::TextExtractionError));
    }

    #[tokio::test]
    async fn test_scanned_pdf_recovered_by_ocr() {
        let parser = ResumeParser::new(
            extractor_with(&"x".repeat(40), S1_TEXT),
            EntityExtractor::new(None, "US"),
            Structurer::new(None),
        );
        let file = fixture(".pdf", b"%PDF-1.4");

        let result = parser.parse(file.path()).await;
        assert!(result.success);
        assert!(result.metadata.is_scanned);
        assert_eq!(result.metadata.extraction_method, "tesseract");
    }

    #[tokio::test]
    async fn test_unreachable_llm_yields_degraded_record() {
        let parser = parser_with(S1_TEXT, Some(ScriptedModel::unreachable()));
        let file = fixture(".docx", b"PK\x03\x04");

        let result = parser.parse(file.path()).await;
        assert!(result.success);
        assert!(result.warnings.contains(&LLM_DEGRADED_WARNING.to_string()));
        assert!(!result.metadata.llm_used);
        assert!(result
            .error_details
            .iter()
            .any(|d| d.kind == ParseErrorKind::LlmEnhancementError));
        assert_eq!(result.failure_kind(), None);

        let ParseOutcome::Degraded { data, warnings } = result.outcome() else {
            panic!("expected degraded outcome");
        };
        assert_eq!(warnings, vec![LLM_DEGRADED_WARNING]);
        assert_eq!(data.personal_info.email.as_deref(), Some("john.doe@example.com"));
        assert_eq!(data.personal_info.name.as_deref(), Some("John Doe"));
        assert!(data.experience.is_empty());
        let names = data.skill_names();
        assert!(names.contains(&"Python".to_string()));
        assert!(names.contains(&"PostgreSQL".to_string()));
    }

    #[tokio::test]
    async fn test_boundary_files_fail_validation() {
        let parser = parser_with(S1_TEXT, None);

        let empty = fixture(".pdf", b"");
        let result = parser.parse(empty.path()).await;
        assert_eq!(result.errors, vec!["EmptyFile"]);
        assert_eq!(result.failure_kind(), Some(ParseErrorKind::FileValidationError));

        let txt = fixture(".txt", S1_TEXT.as_bytes());
        let result = parser.parse(txt.path()).await;
        assert_eq!(result.errors, vec!["UnsupportedFormat"]);
        assert!(matches!(result.outcome(), ParseOutcome::Failed { .. }));

        let big = fixture(".pdf", b"%PDF");
        big.as_file()
            .set_len(text_extractor::MAX_FILE_BYTES + 1)
            .unwrap();
        let result = parser.parse(big.path()).await;
        assert_eq!(result.errors, vec!["FileTooLarge"]);
    }

    #[tokio::test]
    async fn test_invalid_llm_email_is_not_primary() {
        let mut reply = s1_reply();
        reply["personal_info"]["email"] = json!("john.doe@example");
        let text = S1_TEXT.replace("john.doe@example.com", "contact: see portfolio");
        let parser = parser_with(&text, Some(ScriptedModel::replying(reply)));
        let file = fixture(".pdf", b"%PDF-1.4");

        let data = parser.parse(file.path()).await.data.unwrap();
        assert_eq!(data.personal_info.email, None);
    }

    struct StaticExamples;

    #[async_trait]
    impl ExampleProvider for StaticExamples {
        async fn similar_examples(&self, _text: &str, k: usize) -> Vec<FewShotExample> {
            vec![
                FewShotExample {
                    raw_text: "Verified exemplar resume".into(),
                    structured: ResumeData::default(),
                    similarity: 0.9,
                };
                k
            ]
        }
    }

    #[tokio::test]
    async fn test_few_shot_examples_reach_the_prompt() {
        let model = ScriptedModel::replying(s1_reply());
        let parser = parser_with(S1_TEXT, Some(model.clone()))
            .with_examples(Arc::new(StaticExamples), 2);
        let file = fixture(".pdf", b"%PDF-1.4");

        assert!(parser.parse(file.path()).await.success);
        let prompt = &model.prompts.lock().unwrap()[0];
        assert!(prompt.contains("Example 2 (verified)"));
        assert!(prompt.contains("Verified exemplar resume"));
    }
}
