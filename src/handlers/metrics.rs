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
use crate::telemetry::{EndpointMetric, MetricFilter, NewMetric};

/// POST /api/metrics
pub async fn create_metric(
    State(state): State<AppState>,
    payload: Result<Json<NewMetric>, JsonRejection>,
) -> Result<(StatusCode, Json<EndpointMetric>), AppError> {
    let Json(metric) = payload?;
    let metric = state.ingestor.ingest_metric(metric).await?;

    Ok((StatusCode::CREATED, Json(metric)))
}

/// GET /api/metrics
pub async fn list_metrics(
    State(state): State<AppState>,
    filter: Result<Query<MetricFilter>, QueryRejection>,
) -> Result<Json<Vec<EndpointMetric>>, AppError> {
    let Query(filter) = filter?;
    let metrics = state.store.query_metrics(&filter).await?;

    Ok(Json(metrics))
}
