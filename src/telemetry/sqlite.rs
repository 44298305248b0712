//! SQLite implementation of the storage collaborator
//!
//! - Connection pooling (single shared connection for in-memory databases)
//! - Automatic migrations from `./migrations`
//! - WAL mode for concurrent reads/writes on file databases
//! - Timestamps stored as Unix milliseconds, metadata as JSON text

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use super::models::{EndpointMetric, LogEntry, LogLevel, MetricSource, Span, Trace};
use super::store::{
    effective_limit, LogFilter, MetricFilter, StoreError, StoreResult, TelemetryStore,
    TraceFilter,
};
use crate::config::DatabaseConfig;

const LOG_COLUMNS: &str =
    "id, service_name, log_level, message, timestamp, trace_id, span_id, metadata";
const METRIC_COLUMNS: &str = "id, service_name, path, method, status_code, duration_ms, \
     language, framework, version, environment, timestamp, request_id";
const TRACE_COLUMNS: &str = "id, service_name, start_time, end_time, duration_ms";
const SPAN_COLUMNS: &str =
    "id, trace_id, parent_id, service, operation, start_time, end_time, duration_ms";

/// Telemetry store backed by a SQLite connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect using the database section of the configuration and run migrations
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteStore::connect(&config.database).await?;
    /// ```
    pub async fn connect(cfg: &DatabaseConfig) -> StoreResult<Self> {
        let in_memory = cfg.url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(&cfg.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        if !in_memory {
            if let Some(parent) = options.get_filename().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
                }
            }
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        // Every connection to `:memory:` is a separate database, so keep exactly one alive
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(cfg.max_connections.max(1))
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_seconds))
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory store, mostly for tests
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        })
        .await
    }

    /// Wrap an existing pool, applying pending migrations
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Telemetry database migrations completed");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64, column: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::CorruptRow(format!("{} out of range: {}", column, ms)))
}

fn from_optional_millis(ms: Option<i64>, column: &str) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(|v| from_millis(v, column)).transpose()
}

/// Unique-key violations become `Duplicate`; everything else is a database error
fn map_insert_error(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(what());
        }
    }
    StoreError::Database(err)
}

fn row_to_log(row: &SqliteRow) -> StoreResult<LogEntry> {
    let log_level = row
        .try_get::<Option<String>, _>("log_level")?
        .filter(|l| !l.is_empty())
        .map(|l| l.parse::<LogLevel>())
        .transpose()
        .map_err(StoreError::CorruptRow)?;
    let metadata: String = row.try_get("metadata")?;

    Ok(LogEntry {
        id: Some(row.try_get("id")?),
        service_name: row.try_get("service_name")?,
        log_level,
        message: row.try_get("message")?,
        timestamp: from_millis(row.try_get("timestamp")?, "timestamp")?,
        trace_id: row.try_get("trace_id")?,
        span_id: row.try_get("span_id")?,
        metadata: serde_json::from_str(&metadata)?,
    })
}

fn row_to_metric(row: &SqliteRow) -> StoreResult<EndpointMetric> {
    let status_code: i64 = row.try_get("status_code")?;
    Ok(EndpointMetric {
        id: Some(row.try_get("id")?),
        service_name: row.try_get("service_name")?,
        path: row.try_get("path")?,
        method: row.try_get("method")?,
        status_code: u16::try_from(status_code)
            .map_err(|_| StoreError::CorruptRow(format!("status_code {}", status_code)))?,
        duration_ms: row.try_get("duration_ms")?,
        source: MetricSource {
            language: row.try_get("language")?,
            framework: row.try_get("framework")?,
            version: row.try_get("version")?,
        },
        environment: row.try_get("environment")?,
        timestamp: from_millis(row.try_get("timestamp")?, "timestamp")?,
        request_id: row.try_get("request_id")?,
    })
}

fn row_to_trace(row: &SqliteRow) -> StoreResult<Trace> {
    Ok(Trace {
        id: row.try_get("id")?,
        service_name: row.try_get("service_name")?,
        start_time: from_millis(row.try_get("start_time")?, "start_time")?,
        end_time: from_optional_millis(row.try_get("end_time")?, "end_time")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

fn row_to_span(row: &SqliteRow) -> StoreResult<Span> {
    Ok(Span {
        id: row.try_get("id")?,
        trace_id: row.try_get("trace_id")?,
        parent_id: row.try_get("parent_id")?,
        service: row.try_get("service")?,
        operation: row.try_get("operation")?,
        start_time: from_millis(row.try_get("start_time")?, "start_time")?,
        end_time: from_optional_millis(row.try_get("end_time")?, "end_time")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<u32>, offset: Option<u32>) {
    qb.push(" LIMIT ")
        .push_bind(i64::from(effective_limit(limit)))
        .push(" OFFSET ")
        .push_bind(i64::from(offset.unwrap_or(0)));
}

const INSERT_LOG_SQL: &str = "INSERT INTO logs (service_name, log_level, message, timestamp, trace_id, span_id, metadata)
     VALUES (?, ?, ?, ?, ?, ?, ?)";

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn insert_log(&self, entry: &LogEntry) -> StoreResult<i64> {
        let result = sqlx::query(INSERT_LOG_SQL)
            .bind(&entry.service_name)
            .bind(entry.log_level.map(|l| l.as_str()))
            .bind(&entry.message)
            .bind(to_millis(entry.timestamp))
            .bind(&entry.trace_id)
            .bind(&entry.span_id)
            .bind(serde_json::to_string(&entry.metadata)?)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_rowid())
    }

    async fn insert_logs_atomically(&self, entries: &[LogEntry]) -> StoreResult<Vec<i64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(entries.len());

        // An early return drops `tx`, which rolls the whole batch back
        for entry in entries {
            let result = sqlx::query(INSERT_LOG_SQL)
                .bind(&entry.service_name)
                .bind(entry.log_level.map(|l| l.as_str()))
                .bind(&entry.message)
                .bind(to_millis(entry.timestamp))
                .bind(&entry.trace_id)
                .bind(&entry.span_id)
                .bind(serde_json::to_string(&entry.metadata)?)
                .execute(&mut *tx)
                .await?;
            ids.push(result.last_insert_rowid());
        }

        tx.commit().await?;

        Ok(ids)
    }

    async fn query_logs(&self, filter: &LogFilter) -> StoreResult<Vec<LogEntry>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM logs WHERE 1=1", LOG_COLUMNS));

        if let Some(service) = &filter.service_name {
            qb.push(" AND service_name = ").push_bind(service.clone());
        }
        if let Some(level) = filter.log_level {
            qb.push(" AND log_level = ").push_bind(level.as_str());
        }
        if let Some(needle) = filter.message_contains.as_ref().filter(|n| !n.is_empty()) {
            qb.push(" AND instr(lower(message), lower(")
                .push_bind(needle.clone())
                .push(")) > 0");
        }
        if let Some(trace_id) = &filter.trace_id {
            qb.push(" AND trace_id = ").push_bind(trace_id.clone());
        }
        if let Some(start) = filter.start_time {
            qb.push(" AND timestamp >= ").push_bind(to_millis(start));
        }
        if let Some(end) = filter.end_time {
            qb.push(" AND timestamp <= ").push_bind(to_millis(end));
        }
        qb.push(" ORDER BY timestamp DESC, id DESC");
        push_page(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_log).collect()
    }

    async fn insert_metric(&self, metric: &EndpointMetric) -> StoreResult<i64> {
        let result = sqlx::query(
            "INSERT INTO metrics (service_name, path, method, status_code, duration_ms,
                                  language, framework, version, environment, timestamp, request_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.service_name)
        .bind(&metric.path)
        .bind(&metric.method)
        .bind(i64::from(metric.status_code))
        .bind(metric.duration_ms)
        .bind(&metric.source.language)
        .bind(&metric.source.framework)
        .bind(&metric.source.version)
        .bind(&metric.environment)
        .bind(to_millis(metric.timestamp))
        .bind(&metric.request_id)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn query_metrics(&self, filter: &MetricFilter) -> StoreResult<Vec<EndpointMetric>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM metrics WHERE 1=1", METRIC_COLUMNS));

        if let Some(service) = &filter.service_name {
            qb.push(" AND service_name = ").push_bind(service.clone());
        }
        if let Some(path) = &filter.path {
            qb.push(" AND path = ").push_bind(path.clone());
        }
        if let Some(method) = &filter.method {
            qb.push(" AND method = ").push_bind(method.to_uppercase());
        }
        if let Some(start) = filter.start_time {
            qb.push(" AND timestamp >= ").push_bind(to_millis(start));
        }
        if let Some(end) = filter.end_time {
            qb.push(" AND timestamp <= ").push_bind(to_millis(end));
        }
        qb.push(" ORDER BY timestamp DESC, id DESC");
        push_page(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_metric).collect()
    }

    async fn insert_trace(&self, trace: &Trace) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO traces (id, service_name, start_time, end_time, duration_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&trace.id)
        .bind(&trace.service_name)
        .bind(to_millis(trace.start_time))
        .bind(trace.end_time.map(to_millis))
        .bind(trace.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, || format!("trace {}", trace.id)))?;

        Ok(())
    }

    async fn update_trace(&self, trace: &Trace) -> StoreResult<bool> {
        // Conditional write: only an open trace can be closed
        let result = sqlx::query(
            "UPDATE traces SET end_time = ?, duration_ms = ?
             WHERE id = ? AND end_time IS NULL",
        )
        .bind(trace.end_time.map(to_millis))
        .bind(trace.duration_ms)
        .bind(&trace.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_trace_by_id(&self, id: &str) -> StoreResult<Option<Trace>> {
        let row = sqlx::query(&format!("SELECT {} FROM traces WHERE id = ?", TRACE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_trace).transpose()
    }

    async fn query_traces(&self, filter: &TraceFilter) -> StoreResult<Vec<Trace>> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM traces WHERE 1=1", TRACE_COLUMNS));

        if let Some(service) = &filter.service_name {
            qb.push(" AND service_name = ").push_bind(service.clone());
        }
        if let Some(start) = filter.start_time {
            qb.push(" AND start_time >= ").push_bind(to_millis(start));
        }
        if let Some(end) = filter.end_time {
            qb.push(" AND start_time <= ").push_bind(to_millis(end));
        }
        qb.push(" ORDER BY start_time DESC, id");
        push_page(&mut qb, filter.limit, filter.offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_trace).collect()
    }

    async fn insert_span(&self, span: &Span) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO spans (id, trace_id, parent_id, service, operation, start_time, end_time, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&span.id)
        .bind(&span.trace_id)
        .bind(&span.parent_id)
        .bind(&span.service)
        .bind(&span.operation)
        .bind(to_millis(span.start_time))
        .bind(span.end_time.map(to_millis))
        .bind(span.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, || format!("span {}", span.id)))?;

        Ok(())
    }

    async fn update_span(&self, span: &Span) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE spans SET end_time = ?, duration_ms = ?
             WHERE id = ? AND end_time IS NULL",
        )
        .bind(span.end_time.map(to_millis))
        .bind(span.duration_ms)
        .bind(&span.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_span_by_id(&self, id: &str) -> StoreResult<Option<Span>> {
        let row = sqlx::query(&format!("SELECT {} FROM spans WHERE id = ?", SPAN_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_span).transpose()
    }

    async fn fetch_spans_by_trace(&self, trace_id: &str) -> StoreResult<Vec<Span>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM spans WHERE trace_id = ? ORDER BY start_time ASC, id",
            SPAN_COLUMNS
        ))
        .bind(trace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_span).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
