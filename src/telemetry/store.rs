//! Storage collaborator interface
//!
//! The relational store is the system of record for every telemetry kind.
//! Each call either succeeds or fails as a whole; the only multi-row
//! guarantee is [`TelemetryStore::insert_logs_atomically`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::models::{EndpointMetric, LogEntry, LogLevel, Span, Trace};

pub type StoreResult<T> = Result<T, StoreError>;

/// Default page size for query endpoints
pub const DEFAULT_LIMIT: u32 = 100;
/// Upper bound on any single page
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An entity with the same identifier already exists
    #[error("Duplicate entity: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored row could not be mapped back to a record
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

/// Log query filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    #[serde(default, alias = "service")]
    pub service_name: Option<String>,
    #[serde(default, alias = "level")]
    pub log_level: Option<LogLevel>,
    /// Case-insensitive substring match on the message
    #[serde(default, alias = "message")]
    pub message_contains: Option<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Trace query filters (time range applies to start time)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceFilter {
    #[serde(default, alias = "service")]
    pub service_name: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Endpoint metric query filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricFilter {
    #[serde(default, alias = "service")]
    pub service_name: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

/// Clamp a requested page size into `1..=MAX_LIMIT`
pub fn effective_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => DEFAULT_LIMIT,
        Some(n) => n.min(MAX_LIMIT),
    }
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Insert a single log entry, returning its store-assigned id
    async fn insert_log(&self, entry: &LogEntry) -> StoreResult<i64>;

    /// Insert all entries as one unit; ids are returned in submission order.
    /// On failure none of the entries are visible.
    async fn insert_logs_atomically(&self, entries: &[LogEntry]) -> StoreResult<Vec<i64>>;

    async fn query_logs(&self, filter: &LogFilter) -> StoreResult<Vec<LogEntry>>;

    async fn insert_metric(&self, metric: &EndpointMetric) -> StoreResult<i64>;

    async fn query_metrics(&self, filter: &MetricFilter) -> StoreResult<Vec<EndpointMetric>>;

    async fn insert_trace(&self, trace: &Trace) -> StoreResult<()>;

    /// Record the end of an open trace. Returns `false` when no open trace
    /// with that id exists (unknown, or already closed).
    async fn update_trace(&self, trace: &Trace) -> StoreResult<bool>;

    async fn fetch_trace_by_id(&self, id: &str) -> StoreResult<Option<Trace>>;

    async fn query_traces(&self, filter: &TraceFilter) -> StoreResult<Vec<Trace>>;

    async fn insert_span(&self, span: &Span) -> StoreResult<()>;

    /// Same contract as [`TelemetryStore::update_trace`]
    async fn update_span(&self, span: &Span) -> StoreResult<bool>;

    async fn fetch_span_by_id(&self, id: &str) -> StoreResult<Option<Span>>;

    /// Spans of a trace ordered by start time
    async fn fetch_spans_by_trace(&self, trace_id: &str) -> StoreResult<Vec<Span>>;

    /// Readiness probe
    async fn ping(&self) -> StoreResult<()>;
}
