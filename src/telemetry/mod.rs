//! Telemetry data model, storage collaborator and the write paths built on it

pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod sqlite;
pub mod store;

pub use ingest::{IngestError, Ingestor};
pub use lifecycle::{EntityKind, LifecycleError, LifecycleManager};
pub use models::{
    EndpointMetric, LifecycleState, LogEntry, LogLevel, MetricSource, NewLogEntry, NewMetric,
    Span, StartSpan, StartTrace, Trace,
};
pub use sqlite::SqliteStore;
pub use store::{LogFilter, MetricFilter, StoreError, TelemetryStore, TraceFilter};
