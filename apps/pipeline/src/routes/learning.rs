use std::path::Path;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;

use crate::errors::AppError;
use crate::learning::ExportSummary;
use crate::models::learning::FineTuneRun;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ExportRequest {
    /// Bare file name inside the export directory.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// Strips any directory components so exports stay inside the export dir.
fn export_file_name(requested: Option<&str>) -> String {
    requested
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("training_{}.jsonl", Utc::now().format("%Y%m%d_%H%M%S")))
}

/// POST /api/v1/learning/export
pub async fn handle_export(
    State(state): State<AppState>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportSummary>, AppError> {
    let path = state
        .training_export_dir
        .join(export_file_name(req.file_name.as_deref()));
    let summary = state.learning.export_training_data(&path).await?;
    Ok(Json(summary))
}

#[derive(Debug, Default, Deserialize)]
pub struct FineTuneRequest {
    /// Block until the provider reports a terminal status.
    #[serde(default)]
    pub wait: bool,
}

/// POST /api/v1/learning/fine-tune
pub async fn handle_fine_tune(
    State(state): State<AppState>,
    Json(req): Json<FineTuneRequest>,
) -> Result<Json<FineTuneRun>, AppError> {
    let run = state.learning.submit_fine_tune(req.wait).await?;
    Ok(Json(run))
}
