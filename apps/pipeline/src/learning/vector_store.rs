//! Embedding cache for parsed resumes.
//!
//! Vectors live in a plain `REAL[]` column and similarity is computed in
//! process: the corpus of recruiter-verified resumes is small enough that a
//! filtered scan beats maintaining an index extension.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::learning::EmbeddingEntry;
use crate::models::resume_data::ResumeData;
use crate::storage::StoreResult;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the entry for `entry.resume_id`. Once an entry has
    /// an accuracy, both it and the corrected record stay; only the vector is
    /// refreshed.
    async fn upsert(&self, entry: EmbeddingEntry) -> StoreResult<()>;

    /// Records recruiter feedback on a cached entry, replacing its payload
    /// with the corrected record. Returns false when nothing is cached.
    async fn set_accuracy(
        &self,
        resume_id: Uuid,
        accuracy: f64,
        corrected: &ResumeData,
    ) -> StoreResult<bool>;

    /// The `k` entries most similar to `query` whose accuracy is at least
    /// `min_accuracy`, best first.
    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        min_accuracy: f64,
    ) -> StoreResult<Vec<(EmbeddingEntry, f32)>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Sorts scored entries best first and keeps `k`.
pub(crate) fn rank(
    candidates: impl IntoIterator<Item = EmbeddingEntry>,
    query: &[f32],
    k: usize,
) -> Vec<(EmbeddingEntry, f32)> {
    let mut scored: Vec<(EmbeddingEntry, f32)> = candidates
        .into_iter()
        .map(|e| {
            let sim = cosine_similarity(query, &e.embedding);
            (e, sim)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ────────────────────────────────────────────────────────────────────────────

#[derive(FromRow)]
struct EmbeddingRow {
    resume_id: Uuid,
    embedding: Vec<f32>,
    structured: Json<ResumeData>,
    accuracy: Option<f64>,
    updated_at: DateTime<Utc>,
}

impl From<EmbeddingRow> for EmbeddingEntry {
    fn from(row: EmbeddingRow) -> Self {
        EmbeddingEntry {
            resume_id: row.resume_id,
            embedding: row.embedding,
            structured: row.structured.0,
            accuracy: row.accuracy,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, entry: EmbeddingEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_embeddings (resume_id, embedding, structured, accuracy, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (resume_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                structured = CASE WHEN resume_embeddings.accuracy IS NULL
                                  THEN EXCLUDED.structured
                                  ELSE resume_embeddings.structured END,
                accuracy = COALESCE(resume_embeddings.accuracy, EXCLUDED.accuracy),
                updated_at = now()
            "#,
        )
        .bind(entry.resume_id)
        .bind(&entry.embedding)
        .bind(Json(&entry.structured))
        .bind(entry.accuracy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_accuracy(
        &self,
        resume_id: Uuid,
        accuracy: f64,
        corrected: &ResumeData,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE resume_embeddings
            SET accuracy = $2, structured = $3, updated_at = now()
            WHERE resume_id = $1
            "#,
        )
        .bind(resume_id)
        .bind(accuracy)
        .bind(Json(corrected))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        min_accuracy: f64,
    ) -> StoreResult<Vec<(EmbeddingEntry, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows: Vec<EmbeddingRow> = sqlx::query_as(
            r#"
            SELECT resume_id, embedding, structured, accuracy, updated_at
            FROM resume_embeddings
            WHERE accuracy >= $1 AND cardinality(embedding) = $2
            "#,
        )
        .bind(min_accuracy)
        .bind(query.len() as i32)
        .fetch_all(&self.pool)
        .await?;
        Ok(rank(rows.into_iter().map(EmbeddingEntry::from), query, k))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (tests)
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[derive(Default)]
pub struct MemoryVectorStore {
    entries: std::sync::Mutex<std::collections::HashMap<Uuid, EmbeddingEntry>>,
}

#[cfg(test)]
impl MemoryVectorStore {
    pub fn get(&self, resume_id: Uuid) -> Option<EmbeddingEntry> {
        self.entries.lock().unwrap().get(&resume_id).cloned()
    }
}

#[cfg(test)]
#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, mut entry: EmbeddingEntry) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&entry.resume_id) {
            if existing.accuracy.is_some() {
                entry.accuracy = existing.accuracy;
                entry.structured = existing.structured.clone();
            }
        }
        entries.insert(entry.resume_id, entry);
        Ok(())
    }

    async fn set_accuracy(
        &self,
        resume_id: Uuid,
        accuracy: f64,
        corrected: &ResumeData,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&resume_id) else {
            return Ok(false);
        };
        entry.accuracy = Some(accuracy);
        entry.structured = corrected.clone();
        entry.updated_at = Utc::now();
        Ok(true)
    }

    async fn top_k(
        &self,
        query: &[f32],
        k: usize,
        min_accuracy: f64,
    ) -> StoreResult<Vec<(EmbeddingEntry, f32)>> {
        let entries = self.entries.lock().unwrap();
        let eligible = entries
            .values()
            .filter(|e| e.accuracy.is_some_and(|a| a >= min_accuracy))
            .filter(|e| e.embedding.len() == query.len())
            .cloned();
        Ok(rank(eligible, query, k))
    }
}
