use std::path::PathBuf;
use std::sync::Arc;

use crate::ingest::IngestionService;
use crate::jobs::TaskRunner;
use crate::learning::LearningStore;
use crate::storage::PipelineStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    pub ingest: Arc<IngestionService>,
    /// Used for cancellation, which shares the batch accounting of the workers.
    pub runner: Arc<TaskRunner>,
    pub learning: Arc<LearningStore>,
    pub training_export_dir: PathBuf,
}
