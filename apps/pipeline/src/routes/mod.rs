pub mod health;
pub mod learning;
pub mod resumes;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

/// Upper bound on a request body, multipart batches included.
pub const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/resumes", post(resumes::handle_upload))
        .route("/api/v1/resumes/bulk", post(resumes::handle_bulk_upload))
        .route("/api/v1/resumes/:id/status", get(resumes::handle_status))
        .route("/api/v1/resumes/:id/cancel", post(resumes::handle_cancel))
        .route("/api/v1/resumes/:id/feedback", post(resumes::handle_feedback))
        .route("/api/v1/learning/export", post(learning::handle_export))
        .route("/api/v1/learning/fine-tune", post(learning::handle_fine_tune))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
