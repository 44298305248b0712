//! Trace/span lifecycle manager
//!
//! Traces and spans move through `Open -> Closed` exactly once. The manager
//! validates input, computes the transition and issues the corresponding
//! write; the store remains the system of record.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::models::{self, elapsed_ms, LifecycleState, Span, StartSpan, StartTrace, Trace};
use super::store::{StoreError, TelemetryStore, TraceFilter};
use crate::metrics;

/// Which lifecycle entity an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Trace,
    Span,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Span => "span",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} {id} is already closed")]
    AlreadyClosed { kind: EntityKind, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

fn require(value: &str, what: &str) -> LifecycleResult<()> {
    if value.trim().is_empty() {
        return Err(LifecycleError::Validation(format!("{} is required", what)));
    }
    Ok(())
}

/// Resolve start/end for a new entity. A caller-supplied end creates it closed.
fn resolve_times(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> LifecycleResult<(DateTime<Utc>, Option<DateTime<Utc>>, Option<f64>)> {
    let start = start.map(|t| t.trunc_subsecs(3)).unwrap_or_else(models::now);
    match end.map(|t| t.trunc_subsecs(3)) {
        Some(end) if end < start => Err(LifecycleError::Validation(
            "end time must not precede start time".to_string(),
        )),
        Some(end) => Ok((start, Some(end), Some(elapsed_ms(start, end)))),
        None => Ok((start, None, None)),
    }
}

/// Client-supplied identifier, or a fresh 128-bit random one
fn resolve_id(id: Option<String>) -> String {
    id.filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Coordinates trace and span state transitions against the store
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn TelemetryStore>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Record the start of a trace and persist it
    pub async fn start_trace(&self, req: StartTrace) -> LifecycleResult<Trace> {
        require(&req.service_name, "service name")?;
        let (start_time, end_time, duration_ms) = resolve_times(req.start_time, req.end_time)?;

        let trace = Trace {
            id: resolve_id(req.id),
            service_name: req.service_name,
            start_time,
            end_time,
            duration_ms,
        };
        self.store.insert_trace(&trace).await?;

        info!(
            trace_id = %trace.id,
            service = %trace.service_name,
            state = ?trace.state(),
            "Trace started"
        );
        metrics::record_lifecycle_transition(EntityKind::Trace.as_str(), "start");

        Ok(trace)
    }

    /// Close an open trace, computing its duration
    pub async fn end_trace(&self, id: &str) -> LifecycleResult<Trace> {
        let trace = self.open_trace(id).await?;
        let closed = trace.closed_at(models::now());

        if !self.store.update_trace(&closed).await? {
            // Lost a race with a concurrent close, or the row vanished
            return Err(match self.store.fetch_trace_by_id(id).await? {
                Some(_) => already_closed(EntityKind::Trace, id),
                None => not_found(EntityKind::Trace, id),
            });
        }

        info!(
            trace_id = %closed.id,
            duration_ms = closed.duration_ms.unwrap_or_default(),
            "Trace ended"
        );
        metrics::record_lifecycle_transition(EntityKind::Trace.as_str(), "end");

        Ok(closed)
    }

    /// Record the start of a span. The trace reference is not checked.
    pub async fn start_span(&self, req: StartSpan) -> LifecycleResult<Span> {
        require(&req.trace_id, "trace id")?;
        require(&req.service, "service name")?;
        require(&req.operation, "operation name")?;
        let (start_time, end_time, duration_ms) = resolve_times(req.start_time, req.end_time)?;

        let span = Span {
            id: resolve_id(req.id),
            trace_id: req.trace_id,
            parent_id: req.parent_id.filter(|p| !p.is_empty()),
            service: req.service,
            operation: req.operation,
            start_time,
            end_time,
            duration_ms,
        };
        self.store.insert_span(&span).await?;

        info!(
            span_id = %span.id,
            trace_id = %span.trace_id,
            operation = %span.operation,
            state = ?span.state(),
            "Span started"
        );
        metrics::record_lifecycle_transition(EntityKind::Span.as_str(), "start");

        Ok(span)
    }

    pub async fn end_span(&self, id: &str) -> LifecycleResult<Span> {
        let span = self.open_span(id).await?;
        let closed = span.closed_at(models::now());

        if !self.store.update_span(&closed).await? {
            return Err(match self.store.fetch_span_by_id(id).await? {
                Some(_) => already_closed(EntityKind::Span, id),
                None => not_found(EntityKind::Span, id),
            });
        }

        info!(
            span_id = %closed.id,
            trace_id = %closed.trace_id,
            duration_ms = closed.duration_ms.unwrap_or_default(),
            "Span ended"
        );
        metrics::record_lifecycle_transition(EntityKind::Span.as_str(), "end");

        Ok(closed)
    }

    pub async fn traces(&self, filter: &TraceFilter) -> LifecycleResult<Vec<Trace>> {
        Ok(self.store.query_traces(filter).await?)
    }

    /// Spans referencing `trace_id`, ordered by start time
    pub async fn spans_for_trace(&self, trace_id: &str) -> LifecycleResult<Vec<Span>> {
        Ok(self.store.fetch_spans_by_trace(trace_id).await?)
    }

    async fn open_trace(&self, id: &str) -> LifecycleResult<Trace> {
        match self.store.fetch_trace_by_id(id).await? {
            None => Err(not_found(EntityKind::Trace, id)),
            Some(t) if t.state() == LifecycleState::Closed => {
                Err(already_closed(EntityKind::Trace, id))
            }
            Some(t) => Ok(t),
        }
    }

    async fn open_span(&self, id: &str) -> LifecycleResult<Span> {
        match self.store.fetch_span_by_id(id).await? {
            None => Err(not_found(EntityKind::Span, id)),
            Some(s) if s.state() == LifecycleState::Closed => {
                Err(already_closed(EntityKind::Span, id))
            }
            Some(s) => Ok(s),
        }
    }
}

fn not_found(kind: EntityKind, id: &str) -> LifecycleError {
    LifecycleError::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn already_closed(kind: EntityKind, id: &str) -> LifecycleError {
    LifecycleError::AlreadyClosed {
        kind,
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SqliteStore;
    use chrono::Duration;

    async fn manager() -> LifecycleManager {
        let store = SqliteStore::in_memory().await.unwrap();
        LifecycleManager::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_start_then_end_trace() {
        let manager = manager().await;

        let trace = manager.start_trace(StartTrace::new("checkout")).await.unwrap();
        assert_eq!(trace.state(), LifecycleState::Open);
        assert!(uuid::Uuid::parse_str(&trace.id).is_ok());

        let closed = manager.end_trace(&trace.id).await.unwrap();
        let end = closed.end_time.unwrap();
        assert!(end >= closed.start_time);

        let expected = (end - closed.start_time).num_milliseconds() as f64;
        assert!((closed.duration_ms.unwrap() - expected).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_end_unknown_trace_is_not_found() {
        let manager = manager().await;

        let err = manager.end_trace("does-not-exist").await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotFound { kind: EntityKind::Trace, .. }
        ));
    }

    #[tokio::test]
    async fn test_double_close_is_rejected() {
        let manager = manager().await;
        let trace = manager.start_trace(StartTrace::new("svc")).await.unwrap();

        let first = manager.end_trace(&trace.id).await.unwrap();
        let err = manager.end_trace(&trace.id).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyClosed { .. }));

        // First close is preserved
        let stored = manager.store.fetch_trace_by_id(&trace.id).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn test_client_supplied_id_and_duplicate() {
        let manager = manager().await;
        let req = StartTrace {
            id: Some("trace-abc".to_string()),
            ..StartTrace::new("svc")
        };

        let trace = manager.start_trace(req.clone()).await.unwrap();
        assert_eq!(trace.id, "trace-abc");

        let err = manager.start_trace(req).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Store(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_validation_happens_before_persistence() {
        let manager = manager().await;

        let err = manager.start_trace(StartTrace::new("  ")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let start = models::now();
        let req = StartTrace {
            id: Some("backwards".to_string()),
            start_time: Some(start),
            end_time: Some(start - Duration::seconds(1)),
            ..StartTrace::new("svc")
        };
        assert!(matches!(
            manager.start_trace(req).await.unwrap_err(),
            LifecycleError::Validation(_)
        ));
        assert!(manager.store.fetch_trace_by_id("backwards").await.unwrap().is_none());

        for req in [
            StartSpan::new("", "svc", "op"),
            StartSpan::new("t", "", "op"),
            StartSpan::new("t", "svc", ""),
        ] {
            assert!(matches!(
                manager.start_span(req).await.unwrap_err(),
                LifecycleError::Validation(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_caller_supplied_end_creates_closed_trace() {
        let manager = manager().await;
        let start = models::now() - Duration::seconds(2);
        let req = StartTrace {
            start_time: Some(start),
            end_time: Some(start + Duration::milliseconds(1500)),
            ..StartTrace::new("batch-job")
        };

        let trace = manager.start_trace(req).await.unwrap();
        assert_eq!(trace.state(), LifecycleState::Closed);
        assert_eq!(trace.duration_ms, Some(1500.0));
        assert!(matches!(
            manager.end_trace(&trace.id).await.unwrap_err(),
            LifecycleError::AlreadyClosed { .. }
        ));
    }

    #[tokio::test]
    async fn test_future_start_closes_with_zero_duration() {
        let manager = manager().await;
        let req = StartTrace {
            start_time: Some(models::now() + Duration::hours(1)),
            ..StartTrace::new("skewed")
        };

        let trace = manager.start_trace(req).await.unwrap();
        let closed = manager.end_trace(&trace.id).await.unwrap();
        assert_eq!(closed.end_time, Some(closed.start_time));
        assert_eq!(closed.duration_ms, Some(0.0));
    }

    #[tokio::test]
    async fn test_span_tree_without_trace_check() {
        let manager = manager().await;

        // No trace with this id exists; the reference is advisory
        let root = manager
            .start_span(StartSpan::new("orphan-trace", "api", "GET /orders"))
            .await
            .unwrap();
        let child = manager
            .start_span(StartSpan::new("orphan-trace", "db", "SELECT").with_parent(root.id.clone()))
            .await
            .unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));

        let closed = manager.end_span(&child.id).await.unwrap();
        assert!(closed.duration_ms.unwrap() >= 0.0);
        assert!(matches!(
            manager.end_span("missing").await.unwrap_err(),
            LifecycleError::NotFound { kind: EntityKind::Span, .. }
        ));

        let spans = manager.spans_for_trace("orphan-trace").await.unwrap();
        assert_eq!(spans.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_close_has_one_winner() {
        let manager = manager().await;
        let trace = manager.start_trace(StartTrace::new("svc")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                let id = trace.id.clone();
                tokio::spawn(async move { manager.end_trace(&id).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LifecycleError::AlreadyClosed { .. }) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(winners, 1);
    }
}
