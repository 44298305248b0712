//! Trace and span lifecycle endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};

use super::AppState;
use crate::error::AppError;
use crate::telemetry::{Span, StartSpan, StartTrace, Trace, TraceFilter};

/// POST /api/traces
pub async fn start_trace(
    State(state): State<AppState>,
    payload: Result<Json<StartTrace>, JsonRejection>,
) -> Result<(StatusCode, Json<Trace>), AppError> {
    let Json(req) = payload?;
    let trace = state.lifecycle.start_trace(req).await?;

    Ok((StatusCode::CREATED, Json(trace)))
}

/// POST /api/traces/{trace_id}/end
pub async fn end_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Trace>, AppError> {
    Ok(Json(state.lifecycle.end_trace(&trace_id).await?))
}

/// GET /api/traces
pub async fn list_traces(
    State(state): State<AppState>,
    filter: Result<Query<TraceFilter>, QueryRejection>,
) -> Result<Json<Vec<Trace>>, AppError> {
    let Query(filter) = filter?;
    Ok(Json(state.lifecycle.traces(&filter).await?))
}

/// GET /api/traces/{trace_id}/spans
pub async fn list_trace_spans(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
) -> Result<Json<Vec<Span>>, AppError> {
    Ok(Json(state.lifecycle.spans_for_trace(&trace_id).await?))
}

/// POST /api/spans
pub async fn start_span(
    State(state): State<AppState>,
    payload: Result<Json<StartSpan>, JsonRejection>,
) -> Result<(StatusCode, Json<Span>), AppError> {
    let Json(req) = payload?;
    let span = state.lifecycle.start_span(req).await?;

    Ok((StatusCode::CREATED, Json(span)))
}

/// POST /api/spans/{span_id}/end
pub async fn end_span(
    State(state): State<AppState>,
    Path(span_id): Path<String>,
) -> Result<Json<Span>, AppError> {
    Ok(Json(state.lifecycle.end_span(&span_id).await?))
}
