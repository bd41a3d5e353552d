use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm_client::{build_http_client, read_json, truncate_chars, LlmError, LlmSettings};

/// Upper bound on characters sent to the embedding endpoint.
pub const MAX_EMBEDDING_CHARS: usize = 8000;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds the first [`MAX_EMBEDDING_CHARS`] characters of `text`.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct EmbeddingClient {
    client: Client,
    settings: LlmSettings,
}

impl EmbeddingClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_http_client()?,
            settings,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let input = truncate_chars(text, MAX_EMBEDDING_CHARS);
        let response = self
            .client
            .post(self.settings.endpoint("embeddings"))
            .bearer_auth(&self.settings.api_key)
            .json(&EmbeddingRequest {
                model: &self.settings.model,
                input,
            })
            .send()
            .await?;

        let body: EmbeddingResponse = read_json(response).await?;
        let embedding = body
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or(LlmError::EmptyContent)?;
        debug!(dimensions = embedding.len(), "Embedding computed");
        Ok(embedding)
    }
}
