use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};

use super::AppState;
use crate::error::AppError;
use crate::telemetry::{LogEntry, LogFilter, NewLogEntry};

/// POST /api/logs
pub async fn create_log(
    State(state): State<AppState>,
    payload: Result<Json<NewLogEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<LogEntry>), AppError> {
    let Json(entry) = payload?;
    let entry = state.ingestor.ingest_log(entry).await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// POST /api/logs/bulk
///
/// The body is a JSON array; the batch is written all-or-nothing.
pub async fn create_logs_bulk(
    State(state): State<AppState>,
    payload: Result<Json<Vec<NewLogEntry>>, JsonRejection>,
) -> Result<(StatusCode, Json<Vec<LogEntry>>), AppError> {
    let Json(entries) = payload?;
    let entries = state.ingestor.ingest_bulk(entries).await?;

    Ok((StatusCode::CREATED, Json(entries)))
}

/// GET /api/logs
pub async fn list_logs(
    State(state): State<AppState>,
    filter: Result<Query<LogFilter>, QueryRejection>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    let Query(filter) = filter?;
    let logs = state.store.query_logs(&filter).await?;

    Ok(Json(logs))
}
