//! Client for an OpenAI-compatible fine-tuning service.
//!
//! The pipeline never trains in-process: it uploads a JSONL dataset, creates a
//! job and optionally polls it until the provider reports a terminal status.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm_client::{build_http_client, read_json, LlmError, LlmSettings};

pub const DEFAULT_EPOCHS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct Hyperparameters {
    pub n_epochs: u32,
    pub batch_size: String,
    pub learning_rate_multiplier: String,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            n_epochs: DEFAULT_EPOCHS,
            batch_size: "auto".to_string(),
            learning_rate_multiplier: "auto".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    training_file: &'a str,
    model: &'a str,
    suffix: &'a str,
    hyperparameters: Hyperparameters,
}

#[derive(Debug, Deserialize)]
struct FileObject {
    id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FineTuneJob {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub fine_tuned_model: Option<String>,
}

impl FineTuneJob {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "cancelled")
    }

    pub fn succeeded(&self) -> bool {
        self.status == "succeeded"
    }
}

#[derive(Clone)]
pub struct FineTuneClient {
    client: Client,
    settings: LlmSettings,
}

impl FineTuneClient {
    /// `settings.model` is the base model to fine-tune.
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client()?,
            settings,
        })
    }

    /// Uploads a JSONL dataset with `purpose=fine-tune`; returns the file id.
    pub async fn upload_training_file(
        &self,
        file_name: &str,
        jsonl: Vec<u8>,
    ) -> Result<String, LlmError> {
        let part = Part::bytes(jsonl)
            .file_name(file_name.to_string())
            .mime_str("application/jsonl")?;
        let form = Form::new().text("purpose", "fine-tune").part("file", part);

        let response = self
            .client
            .post(self.settings.endpoint("files"))
            .bearer_auth(&self.settings.api_key)
            .multipart(form)
            .send()
            .await?;
        let file: FileObject = read_json(response).await?;
        info!(file_id = %file.id, "Uploaded fine-tune training file");
        Ok(file.id)
    }

    pub async fn create_job(
        &self,
        training_file_id: &str,
        suffix: &str,
        hyperparameters: Hyperparameters,
    ) -> Result<FineTuneJob, LlmError> {
        let response = self
            .client
            .post(self.settings.endpoint("fine_tuning/jobs"))
            .bearer_auth(&self.settings.api_key)
            .json(&CreateJobRequest {
                training_file: training_file_id,
                model: &self.settings.model,
                suffix,
                hyperparameters,
            })
            .send()
            .await?;
        let job: FineTuneJob = read_json(response).await?;
        info!(job_id = %job.id, status = %job.status, "Created fine-tune job");
        Ok(job)
    }

    pub async fn job_status(&self, job_id: &str) -> Result<FineTuneJob, LlmError> {
        let response = self
            .client
            .get(self.settings.endpoint(&format!("fine_tuning/jobs/{job_id}")))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await?;
        read_json(response).await
    }

    /// Polls until the job is terminal or `max_polls` is reached, returning
    /// the last observed state.
    pub async fn wait_for_completion(
        &self,
        job_id: &str,
        poll_interval: Duration,
        max_polls: Option<u32>,
    ) -> Result<FineTuneJob, LlmError> {
        let mut polls = 0u32;
        loop {
            let job = self.job_status(job_id).await?;
            polls += 1;
            if job.is_terminal() {
                if !job.succeeded() {
                    warn!(job_id, status = %job.status, "Fine-tune job did not succeed");
                }
                return Ok(job);
            }
            if max_polls.is_some_and(|max| polls >= max) {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Date-stamped model suffix, e.g. `resume-parser-20250301`.
pub fn model_suffix(date: chrono::NaiveDate) -> String {
    format!("resume-parser-{}", date.format("%Y%m%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> FineTuneClient {
        let settings = LlmSettings::new("key".to_string(), "gpt-4o-mini".to_string())
            .with_base_url(server.uri());
        FineTuneClient::new(settings).unwrap()
    }

    #[test]
    fn test_model_suffix_is_date_stamped() {
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(model_suffix(date), "resume-parser-20250301");
    }

    #[tokio::test]
    async fn test_upload_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "file-abc", "object": "file", "purpose": "fine-tune"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server)
            .upload_training_file("train.jsonl", b"{}\n".to_vec())
            .await
            .unwrap();
        assert_eq!(id, "file-abc");
    }

    #[tokio::test]
    async fn test_create_job_sends_default_hyperparameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fine_tuning/jobs"))
            .and(body_partial_json(json!({
                "training_file": "file-abc",
                "model": "gpt-4o-mini",
                "suffix": "resume-parser-20250301",
                "hyperparameters": {
                    "n_epochs": 3,
                    "batch_size": "auto",
                    "learning_rate_multiplier": "auto"
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ftjob-1", "status": "validating_files", "fine_tuned_model": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let job = client_for(&server)
            .create_job("file-abc", "resume-parser-20250301", Hyperparameters::default())
            .await
            .unwrap();
        assert_eq!(job.id, "ftjob-1");
        assert!(!job.is_terminal());
    }

    #[tokio::test]
    async fn test_wait_for_completion_returns_model_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fine_tuning/jobs/ftjob-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ftjob-1",
                "status": "succeeded",
                "fine_tuned_model": "ft:gpt-4o-mini:resume-parser-20250301"
            })))
            .mount(&server)
            .await;

        let job = client_for(&server)
            .wait_for_completion("ftjob-1", Duration::from_millis(1), Some(3))
            .await
            .unwrap();
        assert!(job.succeeded());
        assert_eq!(
            job.fine_tuned_model.as_deref(),
            Some("ft:gpt-4o-mini:resume-parser-20250301")
        );
    }

    #[tokio::test]
    async fn test_wait_for_completion_stops_after_max_polls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fine_tuning/jobs/ftjob-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ftjob-2", "status": "running"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let job = client_for(&server)
            .wait_for_completion("ftjob-2", Duration::from_millis(1), Some(2))
            .await
            .unwrap();
        assert_eq!(job.status, "running");
    }
}
