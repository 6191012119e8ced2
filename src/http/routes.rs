use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::http::handlers;
use crate::http::state::AppState;

/// Create the router.
///
/// ```text
/// POST /batch/trigger              - Start an export run in the background
/// GET  /batch/files                - List export files, newest first
/// GET  /batch/download/today       - Download customers_<yyyyMMdd>.xlsx
/// GET  /batch/download/{filename}  - Download one export file
/// GET  /batch/runs                 - Recent runs from the manifest
/// GET  /batch/runs/{id}            - One run record
/// GET  /batch/health               - Liveness
/// ```
pub fn create_router(state: Arc<AppState>) -> Router {
    let batch_routes = Router::new()
        .route("/trigger", post(handlers::trigger_export))
        .route("/files", get(handlers::list_files))
        .route("/download/today", get(handlers::download_today))
        .route("/download/{filename}", get(handlers::download_file))
        .route("/runs", get(handlers::list_runs))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/health", get(handlers::health))
        .with_state(state);

    Router::new().nest("/batch", batch_routes)
}
