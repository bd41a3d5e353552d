//! Match engine: scores candidates against jobs and keeps `candidate_matches`
//! in step with the latest scores.
//!
//! A pair scoring at or above the threshold is upserted (one active row per
//! pair); a pair that drops below it has its active row retired.

pub mod scoring;

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::matching::{CandidateMatch, CandidateProfile, JobPosting, NewCandidateMatch};
use crate::storage::{MatchRepository, PipelineStore, StoreResult};

pub use scoring::{score_match, MatchScore, MATCH_THRESHOLD};

pub struct MatchEngine {
    store: Arc<dyn PipelineStore>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self { store }
    }

    /// Scores the candidate built from `resume_id` against every active job
    /// visible to them. Returns the matches that were stored.
    pub async fn match_candidate_to_jobs(&self, resume_id: Uuid) -> StoreResult<Vec<CandidateMatch>> {
        let Some(candidate) = self.store.get_candidate_by_resume(resume_id).await? else {
            warn!(resume_id = %resume_id, "No candidate profile for resume, skipping matching");
            return Ok(Vec::new());
        };

        let jobs = self.store.jobs_for_candidate(&candidate).await?;
        let mut stored = Vec::new();
        for job in &jobs {
            if let Some(m) = self.apply(&candidate, job).await? {
                stored.push(m);
            }
        }

        info!(
            candidate_id = %candidate.id,
            jobs = jobs.len(),
            matches = stored.len(),
            "Matched candidate to jobs"
        );
        Ok(stored)
    }

    /// Scores every candidate visible to `job_id` against it. Inactive or
    /// unknown jobs produce no matches.
    pub async fn match_job_to_candidates(&self, job_id: Uuid) -> StoreResult<Vec<CandidateMatch>> {
        let job = match self.store.get_job(job_id).await? {
            Some(job) if job.is_active => job,
            Some(_) => {
                debug!(job_id = %job_id, "Job inactive, skipping matching");
                return Ok(Vec::new());
            }
            None => {
                warn!(job_id = %job_id, "Job not found, skipping matching");
                return Ok(Vec::new());
            }
        };

        let candidates = self.store.candidates_for_job(&job).await?;
        let mut stored = Vec::new();
        for candidate in &candidates {
            if let Some(m) = self.apply(candidate, &job).await? {
                stored.push(m);
            }
        }

        info!(
            job_id = %job.id,
            candidates = candidates.len(),
            matches = stored.len(),
            "Matched job to candidates"
        );
        Ok(stored)
    }

    async fn apply(
        &self,
        candidate: &CandidateProfile,
        job: &JobPosting,
    ) -> StoreResult<Option<CandidateMatch>> {
        let score = score_match(candidate, job);
        if !score.is_persistable() {
            if self.store.deactivate_match(candidate.id, job.id).await? {
                debug!(candidate_id = %candidate.id, job_id = %job.id, "Retired stale match");
            }
            return Ok(None);
        }

        let explanation = scoring::explain(&score);
        let row = self
            .store
            .upsert_match(NewCandidateMatch {
                candidate_id: candidate.id,
                job_id: job.id,
                overall_score: score.overall,
                skill_score: score.skill,
                experience_score: score.experience,
                education_score: score.education,
                location_score: score.location,
                matching_skills: score.matching_skills,
                missing_skills: score.missing_skills,
                explanation,
            })
            .await?;
        Ok(Some(row))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::scoring::tests::{candidate, posting};
    use super::*;
    use crate::models::matching::CandidateUpsert;
    use crate::storage::memory::MemoryStore;

    async fn seed_candidate(store: &MemoryStore, skills: &[&str], owner: Option<Uuid>) -> CandidateProfile {
        let template = candidate(skills);
        let (profile, created) = store
            .upsert_candidate(CandidateUpsert {
                user_id: template.user_id,
                owner_recruiter_id: owner,
                resume_id: template.resume_id,
                name: template.name,
                email: template.email,
                phone: None,
                location: template.location,
                skills: template.skills,
                total_years_experience: template.total_years_experience,
                education_level: template.education_level,
                summary: None,
            })
            .await
            .unwrap();
        assert!(created);
        profile
    }

    #[tokio::test]
    async fn test_candidate_matched_and_persisted() {
        let store = Arc::new(MemoryStore::new());
        let job = posting(&["Python", "React", "PostgreSQL"], &["AWS"]);
        store.add_job_posting(job.clone());
        let profile = seed_candidate(&store, &["Python", "React", "AWS"], None).await;

        let engine = MatchEngine::new(store.clone());
        let matches = engine.match_candidate_to_jobs(profile.resume_id).await.unwrap();

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.job_id, job.id);
        assert_eq!(m.skill_score, 71.67);
        assert!(m.overall_score >= MATCH_THRESHOLD);
        for skill in ["Python", "React", "AWS"] {
            assert!(m.matching_skills.iter().any(|s| s == skill));
        }
        assert!(m.missing_skills.iter().any(|s| s == "PostgreSQL"));
        assert!(!m.explanation.is_empty());
    }

    #[tokio::test]
    async fn test_rematch_keeps_single_active_row() {
        let store = Arc::new(MemoryStore::new());
        store.add_job_posting(posting(&["Python"], &[]));
        let profile = seed_candidate(&store, &["Python"], None).await;
        let engine = MatchEngine::new(store.clone());

        engine.match_candidate_to_jobs(profile.resume_id).await.unwrap();
        engine.match_candidate_to_jobs(profile.resume_id).await.unwrap();

        let active: Vec<_> = store.matches().into_iter().filter(|m| m.is_active).collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_low_score_not_persisted_and_stale_match_retired() {
        let store = Arc::new(MemoryStore::new());
        let mut job = posting(&["Rust", "Kubernetes"], &[]);
        job.min_years = Some(20.0);
        job.education_level = Some(5);
        job.location = Some("Tokyo".into());
        store.add_job_posting(job.clone());
        let profile = seed_candidate(&store, &["Excel"], None).await;

        // A previously stored match for the same pair.
        store
            .upsert_match(NewCandidateMatch {
                candidate_id: profile.id,
                job_id: job.id,
                overall_score: 70.0,
                skill_score: 70.0,
                experience_score: 70.0,
                education_score: 70.0,
                location_score: 70.0,
                matching_skills: vec![],
                missing_skills: vec![],
                explanation: String::new(),
            })
            .await
            .unwrap();

        let engine = MatchEngine::new(store.clone());
        let matches = engine.match_job_to_candidates(job.id).await.unwrap();

        assert!(matches.is_empty());
        assert!(store.matches().iter().all(|m| !m.is_active));
    }

    #[tokio::test]
    async fn test_recruiter_pool_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let job = posting(&["Python"], &[]);
        store.add_job_posting(job.clone());

        let foreign_owner = Uuid::new_v4();
        seed_candidate(&store, &["Python"], Some(foreign_owner)).await;
        seed_candidate(&store, &["Python"], Some(job.recruiter_id)).await;
        seed_candidate(&store, &["Python"], None).await;

        let engine = MatchEngine::new(store.clone());
        let matches = engine.match_job_to_candidates(job.id).await.unwrap();

        assert_eq!(matches.len(), 2);
        let candidates = store.candidates();
        for m in &matches {
            let c = candidates.iter().find(|c| c.id == m.candidate_id).unwrap();
            assert_ne!(c.owner_recruiter_id, Some(foreign_owner));
        }
    }

    #[tokio::test]
    async fn test_inactive_job_skipped() {
        let store = Arc::new(MemoryStore::new());
        let mut job = posting(&["Python"], &[]);
        job.is_active = false;
        store.add_job_posting(job.clone());
        seed_candidate(&store, &["Python"], None).await;

        let engine = MatchEngine::new(store.clone());
        assert!(engine.match_job_to_candidates(job.id).await.unwrap().is_empty());
        assert!(engine.match_job_to_candidates(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_candidate_yields_no_matches() {
        let store = Arc::new(MemoryStore::new());
        store.add_job_posting(posting(&["Python"], &[]));
        let engine = MatchEngine::new(store.clone());
        assert!(engine.match_candidate_to_jobs(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
