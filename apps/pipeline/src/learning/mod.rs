//! Continuous learning: embeddings of parsed resumes, recruiter feedback,
//! few-shot retrieval and fine-tune dataset curation.

pub mod accuracy;
pub mod vector_store;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::llm_client::embeddings::Embedder;
use crate::llm_client::fine_tune::{model_suffix, FineTuneClient, Hyperparameters};
use crate::llm_client::{truncate_chars, LlmError};
use crate::models::learning::{EmbeddingEntry, FeedbackRecord, FineTuneRun, NewFeedback, TrainingExample};
use crate::models::resume_data::ResumeData;
use crate::parser::prompts::{structure_system, PROMPT_TEXT_CHARS};
use crate::parser::structurer::FewShotExample;
use crate::parser::ExampleProvider;
use crate::storage::{LearningRepository, PipelineStore, ResumeRepository, StoreError};

pub use accuracy::{compute_accuracy, AccuracyReport};
pub use vector_store::{PgVectorStore, VectorStore};

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM service error: {0}")]
    Llm(#[from] LlmError),

    #[error("Insufficient corpus: {found} examples, {required} required")]
    InsufficientCorpus { found: usize, required: usize },

    #[error("Fine-tuning is not configured")]
    FineTuneDisabled,

    #[error("Export failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LearningError {
    pub fn code(&self) -> &'static str {
        match self {
            LearningError::Store(_) => "STORE_ERROR",
            LearningError::Llm(_) => "LLM_ERROR",
            LearningError::InsufficientCorpus { .. } => "INSUFFICIENT_CORPUS",
            LearningError::FineTuneDisabled => "FINE_TUNE_DISABLED",
            LearningError::Io(_) => "EXPORT_FAILED",
            LearningError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearningSettings {
    /// Minimum feedback accuracy for a record to enter the training corpus.
    pub training_min_accuracy: f64,
    pub training_min_examples: usize,
    pub auto_fine_tune: bool,
    pub fine_tune_poll_interval: Duration,
    /// Minimum accuracy for a cached resume to serve as a few-shot exemplar.
    pub few_shot_min_accuracy: f64,
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            training_min_accuracy: 0.90,
            training_min_examples: 100,
            auto_fine_tune: false,
            fine_tune_poll_interval: Duration::from_secs(60),
            few_shot_min_accuracy: 0.9,
        }
    }
}

/// Request body of one feedback submission.
#[derive(Debug, Clone)]
pub struct FeedbackInput {
    pub resume_id: Uuid,
    pub recruiter_id: Uuid,
    pub original: ResumeData,
    pub corrected: ResumeData,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub examples: usize,
}

#[derive(Serialize)]
struct TranscriptMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Transcript<'a> {
    messages: [TranscriptMessage<'a>; 3],
}

/// Serialises training examples as newline-delimited chat transcripts:
/// system instruction, raw resume text, corrected JSON.
pub fn training_jsonl(examples: &[TrainingExample]) -> Result<Vec<u8>, serde_json::Error> {
    let system = structure_system();
    let mut out = Vec::new();
    for example in examples {
        let target = serde_json::to_string(&example.corrected.without_derived())?;
        let transcript = Transcript {
            messages: [
                TranscriptMessage { role: "system", content: &system },
                TranscriptMessage {
                    role: "user",
                    content: truncate_chars(&example.raw_text, PROMPT_TEXT_CHARS),
                },
                TranscriptMessage { role: "assistant", content: &target },
            ],
        };
        serde_json::to_writer(&mut out, &transcript)?;
        out.push(b'\n');
    }
    Ok(out)
}

// ────────────────────────────────────────────────────────────────────────────
// LearningStore
// ────────────────────────────────────────────────────────────────────────────

pub struct LearningStore {
    store: Arc<dyn PipelineStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Option<Arc<dyn Embedder>>,
    fine_tune: Option<Arc<FineTuneClient>>,
    settings: LearningSettings,
}

impl LearningStore {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Option<Arc<dyn Embedder>>,
        fine_tune: Option<Arc<FineTuneClient>>,
        settings: LearningSettings,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            fine_tune,
            settings,
        }
    }

    /// Embeds a freshly parsed resume and caches it. Returns false when no
    /// embedding service is configured.
    pub async fn store_on_parse(&self, resume_id: Uuid, data: &ResumeData) -> Result<bool, LearningError> {
        let Some(embedder) = &self.embedder else {
            debug!(resume_id = %resume_id, "No embedding service configured");
            return Ok(false);
        };
        if data.raw_text.trim().is_empty() {
            return Ok(false);
        }

        let embedding = embedder.embed(&data.raw_text).await?;
        let mut structured = data.without_derived();
        // Exemplars need the text they were extracted from.
        structured.raw_text = data.raw_text.clone();
        self.vectors
            .upsert(EmbeddingEntry {
                resume_id,
                embedding,
                structured,
                accuracy: None,
                updated_at: Utc::now(),
            })
            .await?;
        debug!(resume_id = %resume_id, "Stored resume embedding");
        Ok(true)
    }

    /// Scores and stores a recruiter correction, then refreshes the cached
    /// entry. An automatic fine-tune, when enabled, never fails the call.
    pub async fn record_feedback(&self, input: FeedbackInput) -> Result<FeedbackRecord, LearningError> {
        let report = compute_accuracy(&input.original, &input.corrected);
        let record = self
            .store
            .insert_feedback(NewFeedback {
                resume_id: input.resume_id,
                recruiter_id: input.recruiter_id,
                original: input.original,
                corrected: input.corrected,
                accuracy: report.accuracy,
                corrections: report.corrections,
                notes: input.notes,
            })
            .await?;

        let mut corrected = record.corrected.0.without_derived();
        corrected.raw_text = [&record.corrected.0.raw_text, &record.original.0.raw_text]
            .into_iter()
            .find(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_default();
        if corrected.raw_text.is_empty() {
            if let Some(parsed) = self.store.get_resume_data(record.resume_id).await? {
                corrected.raw_text = parsed.raw_text;
            }
        }
        if !self
            .vectors
            .set_accuracy(record.resume_id, record.accuracy, &corrected)
            .await?
        {
            debug!(resume_id = %record.resume_id, "No cached embedding to update");
        }

        info!(
            resume_id = %record.resume_id,
            accuracy = record.accuracy,
            corrections = record.corrections.0.len(),
            "Recorded feedback"
        );

        if self.settings.auto_fine_tune {
            if let Err(e) = self.maybe_auto_fine_tune().await {
                warn!(error = %e, "Automatic fine-tune failed");
            }
        }
        Ok(record)
    }

    /// Top-`k` cached resumes similar to `text`, restricted to entries whose
    /// feedback accuracy is at least `min_accuracy`.
    pub async fn few_shot_examples(
        &self,
        text: &str,
        k: usize,
        min_accuracy: f64,
    ) -> Result<Vec<FewShotExample>, LearningError> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = embedder.embed(text).await?;
        let hits = self.vectors.top_k(&query, k, min_accuracy).await?;
        Ok(hits
            .into_iter()
            .map(|(entry, similarity)| {
                let mut structured = entry.structured;
                let raw_text = std::mem::take(&mut structured.raw_text);
                FewShotExample {
                    raw_text,
                    structured,
                    similarity,
                }
            })
            .collect())
    }

    async fn corpus(&self) -> Result<Vec<TrainingExample>, LearningError> {
        let examples = self
            .store
            .training_examples(self.settings.training_min_accuracy)
            .await?;
        if examples.len() < self.settings.training_min_examples {
            return Err(LearningError::InsufficientCorpus {
                found: examples.len(),
                required: self.settings.training_min_examples,
            });
        }
        Ok(examples)
    }

    /// Writes the curated corpus to `path` as JSONL. Nothing is written when
    /// the corpus is too small.
    pub async fn export_training_data(&self, path: &Path) -> Result<ExportSummary, LearningError> {
        let examples = self.corpus().await?;
        let bytes = training_jsonl(&examples)?;

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = match target.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            tmp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

        info!(path = %path.display(), examples = examples.len(), "Exported training data");
        Ok(ExportSummary {
            path: path.to_path_buf(),
            examples: examples.len(),
        })
    }

    /// Uploads the corpus and creates a fine-tune job. With `wait`, polls
    /// until the provider reports a terminal status.
    pub async fn submit_fine_tune(&self, wait: bool) -> Result<FineTuneRun, LearningError> {
        let client = self.fine_tune.as_ref().ok_or(LearningError::FineTuneDisabled)?;
        let examples = self.corpus().await?;
        let bytes = training_jsonl(&examples)?;

        let today = Utc::now().date_naive();
        let suffix = model_suffix(today);
        let file_id = client
            .upload_training_file(&format!("{suffix}.jsonl"), bytes)
            .await?;
        let job = client
            .create_job(&file_id, &suffix, Hyperparameters::default())
            .await?;

        let mut run = self
            .store
            .insert_fine_tune_run(&job.id, &file_id, examples.len() as i32, &job.status)
            .await?;
        info!(job_id = %job.id, examples = examples.len(), "Submitted fine-tune job");

        if wait {
            let finished = client
                .wait_for_completion(&job.id, self.settings.fine_tune_poll_interval, None)
                .await?;
            self.store
                .update_fine_tune_run(run.id, &finished.status, finished.fine_tuned_model.as_deref())
                .await?;
            run.status = finished.status;
            run.fine_tuned_model = finished.fine_tuned_model;
        }
        Ok(run)
    }

    /// Submits a fine-tune once enough new high-accuracy feedback has
    /// accumulated since the previous run.
    pub async fn maybe_auto_fine_tune(&self) -> Result<Option<FineTuneRun>, LearningError> {
        if self.fine_tune.is_none() {
            return Ok(None);
        }
        let since = self.store.latest_fine_tune_run().await?.map(|r| r.created_at);
        let fresh = self
            .store
            .count_feedback_since(self.settings.training_min_accuracy, since)
            .await?;
        if (fresh as usize) < self.settings.training_min_examples {
            debug!(fresh, "Not enough new feedback for fine-tuning");
            return Ok(None);
        }
        self.submit_fine_tune(false).await.map(Some)
    }
}

#[async_trait]
impl ExampleProvider for LearningStore {
    async fn similar_examples(&self, text: &str, k: usize) -> Vec<FewShotExample> {
        match self
            .few_shot_examples(text, k, self.settings.few_shot_min_accuracy)
            .await
        {
            Ok(examples) => examples,
            Err(e) => {
                warn!(error = %e, "Few-shot retrieval failed");
                Vec::new()
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
