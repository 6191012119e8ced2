use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::domains::export::types::{
    ExportError, ExportFileData, ExportRun, FileInfo, RunTrigger, XLSX_CONTENT_TYPE,
};
use crate::errors::DomainError;
use crate::http::state::AppState;

pub const SERVICE_NAME: &str = "Customer Batch Export";
pub const DEFAULT_RUNS_LIMIT: i64 = 50;
const MAX_RUNS_LIMIT: i64 = 500;

/// Response for listing export files.
#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub count: usize,
    pub files: Vec<FileInfo>,
}

/// Response for listing runs.
#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub count: usize,
    pub runs: Vec<ExportRun>,
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

fn status_for(error: &ExportError) -> StatusCode {
    match error {
        ExportError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
        ExportError::NotFound(_) => StatusCode::NOT_FOUND,
        ExportError::AlreadyRunning(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(json!({
            "status": "error",
            "message": message,
            "timestamp": Utc::now().timestamp_millis(),
        })),
    )
        .into_response()
}

/// Start a run without waiting for it.
///
/// POST /batch/trigger
pub async fn trigger_export(State(state): State<Arc<AppState>>) -> Response {
    match state.launcher.launch(RunTrigger::OnDemand) {
        Ok(handle) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "message": "Batch job triggered successfully!",
                "timestamp": Utc::now().timestamp_millis(),
                "runId": handle.run_id,
                "runToken": handle.run_token,
            })),
        )
            .into_response(),
        Err(e) => {
            log::warn!("Trigger rejected: {}", e);
            error_body(status_for(&e), e.to_string())
        }
    }
}

/// GET /batch/files
pub async fn list_files(State(state): State<Arc<AppState>>) -> Response {
    match state.catalog.list_files().await {
        Ok(files) => {
            let message = if files.is_empty() {
                "No export files found"
            } else {
                "Files retrieved successfully"
            };
            Json(FileListResponse {
                status: "success",
                message,
                count: files.len(),
                files,
            })
            .into_response()
        }
        Err(e) => {
            log::error!("Failed to list export files: {}", e);
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error listing files: {}", e),
            )
        }
    }
}

fn file_response(data: ExportFileData) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", data.name),
            ),
        ],
        data.bytes,
    )
        .into_response()
}

fn download_result(result: Result<ExportFileData, ExportError>) -> Response {
    match result {
        Ok(data) => file_response(data),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                log::error!("Download failed: {}", e);
            }
            error_body(status, e.to_string())
        }
    }
}

/// GET /batch/download/{filename}
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    download_result(state.catalog.get_file(&filename).await)
}

/// GET /batch/download/today
pub async fn download_today(State(state): State<Arc<AppState>>) -> Response {
    download_result(state.catalog.get_today_file().await)
}

/// GET /batch/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
    match state.runs.list_recent(limit).await {
        Ok(runs) => Json(RunListResponse {
            count: runs.len(),
            runs,
        })
        .into_response(),
        Err(e) => {
            log::error!("Failed to list runs: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /batch/runs/{id}
pub async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Ok(run_id) = Uuid::parse_str(&id) else {
        return error_body(StatusCode::BAD_REQUEST, format!("Invalid run id '{}'", id));
    };
    match state.runs.find_by_id(run_id).await {
        Ok(run) => Json(run).into_response(),
        Err(DomainError::EntityNotFound(_, _)) => {
            error_body(StatusCode::NOT_FOUND, format!("Run '{}' not found", id))
        }
        Err(e) => {
            log::error!("Failed to load run {}: {}", id, e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /batch/health
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "UP",
        "service": SERVICE_NAME,
        "timestamp": Local::now().date_naive().format("%Y-%m-%d").to_string(),
    }))
}
