//! Telemetry records: logs, endpoint metrics, traces and spans
//!
//! Inbound request bodies (`New*` / `Start*`) are kept separate from the
//! validated records so that malformed input is reported as a validation
//! failure rather than a deserialization failure.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current time truncated to the millisecond precision used by storage
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Elapsed milliseconds between two instants (fractional)
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1000.0,
        None => delta.num_milliseconds() as f64,
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Treat empty correlation identifiers as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ============================================================
// Logs
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "FATAL" => Ok(Self::Fatal),
            other => Err(format!("invalid log level: {}", other)),
        }
    }
}

/// Log record as submitted by a client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewLogEntry {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl NewLogEntry {
    /// Check mandatory fields and the level enumeration without touching anything else
    pub fn validate(&self) -> Result<Option<LogLevel>, String> {
        if is_blank(&self.service_name) {
            return Err("service name is required".to_string());
        }
        if is_blank(&self.message) {
            return Err("message is required".to_string());
        }
        match self.log_level.as_deref() {
            None | Some("") => Ok(None),
            Some(level) => level.parse().map(Some),
        }
    }

    /// Validate and apply defaults (timestamp, metadata, null correlation ids)
    pub fn into_entry(self, received_at: DateTime<Utc>) -> Result<LogEntry, String> {
        let log_level = self.validate()?;

        let metadata = match self.metadata {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(value) => value,
        };

        Ok(LogEntry {
            id: None,
            service_name: self.service_name,
            log_level,
            message: self.message,
            timestamp: self
                .timestamp
                .map(|t| t.trunc_subsecs(3))
                .unwrap_or(received_at),
            trace_id: non_empty(self.trace_id),
            span_id: non_empty(self.span_id),
            metadata,
        })
    }
}

/// Validated log record; `id` is assigned by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Option<i64>,
    pub service_name: String,
    pub log_level: Option<LogLevel>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub metadata: serde_json::Value,
}

// ============================================================
// Endpoint metrics
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSource {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub version: String,
}

/// Endpoint metric as submitted by a client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMetric {
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub source: MetricSource,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl NewMetric {
    pub fn into_metric(self, received_at: DateTime<Utc>) -> Result<EndpointMetric, String> {
        if is_blank(&self.service_name) {
            return Err("service name is required".to_string());
        }
        if is_blank(&self.path) {
            return Err("path is required".to_string());
        }
        if is_blank(&self.method) {
            return Err("method is required".to_string());
        }
        if !(100..=599).contains(&self.status_code) {
            return Err(format!("invalid status code: {}", self.status_code));
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Err("duration_ms must be a non-negative number".to_string());
        }

        Ok(EndpointMetric {
            id: None,
            service_name: self.service_name,
            path: self.path,
            method: self.method.to_uppercase(),
            status_code: self.status_code,
            duration_ms: self.duration_ms,
            source: self.source,
            environment: self.environment,
            timestamp: self
                .timestamp
                .map(|t| t.trunc_subsecs(3))
                .unwrap_or(received_at),
            request_id: non_empty(self.request_id),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetric {
    pub id: Option<i64>,
    pub service_name: String,
    pub path: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: f64,
    pub source: MetricSource,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
}

// ============================================================
// Traces and spans
// ============================================================

/// Lifecycle state shared by traces and spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Start recorded, end absent
    Open,
    /// End and duration recorded; terminal
    Closed,
}

/// Compute the closing timestamp and duration for an entity started at `start`.
///
/// The end never precedes the start, even when the start was caller-supplied
/// and lies ahead of the local clock.
pub fn close_at(start: DateTime<Utc>, now: DateTime<Utc>) -> (DateTime<Utc>, f64) {
    let end = now.max(start);
    (end, elapsed_ms(start, end))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
}

impl Trace {
    pub fn state(&self) -> LifecycleState {
        if self.end_time.is_some() {
            LifecycleState::Closed
        } else {
            LifecycleState::Open
        }
    }

    /// Record the end of the trace, returning the closed copy
    pub fn closed_at(&self, now: DateTime<Utc>) -> Trace {
        let (end, duration) = close_at(self.start_time, now);
        Trace {
            end_time: Some(end),
            duration_ms: Some(duration),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    pub parent_id: Option<String>,
    pub service: String,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
}

impl Span {
    pub fn state(&self) -> LifecycleState {
        if self.end_time.is_some() {
            LifecycleState::Closed
        } else {
            LifecycleState::Open
        }
    }

    pub fn closed_at(&self, now: DateTime<Utc>) -> Span {
        let (end, duration) = close_at(self.start_time, now);
        Span {
            end_time: Some(end),
            duration_ms: Some(duration),
            ..self.clone()
        }
    }
}

/// Request body for starting a trace
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartTrace {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StartTrace {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }
}

/// Request body for starting a span
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartSpan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl StartSpan {
    pub fn new(
        trace_id: impl Into<String>,
        service: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            service: service.into(),
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}
