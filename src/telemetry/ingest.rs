//! Log ingestion: single entries and all-or-nothing batches

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use super::models::{self, EndpointMetric, LogEntry, NewLogEntry, NewMetric};
use super::store::{StoreError, TelemetryStore};
use crate::metrics;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Entry at `index` (0-based position in the submission) failed validation
    #[error("entry {index}: {reason}")]
    Invalid { index: usize, reason: String },

    #[error("batch of {size} entries exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes logs and endpoint metrics through the store
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn TelemetryStore>,
    max_bulk_entries: usize,
}

impl Ingestor {
    pub fn new(store: Arc<dyn TelemetryStore>, max_bulk_entries: usize) -> Self {
        Self {
            store,
            max_bulk_entries,
        }
    }

    /// Validate, default and persist a single log entry
    pub async fn ingest_log(&self, entry: NewLogEntry) -> Result<LogEntry, IngestError> {
        let mut entry = entry
            .into_entry(models::now())
            .map_err(|reason| IngestError::Invalid { index: 0, reason })?;

        entry.id = Some(self.store.insert_log(&entry).await?);
        metrics::record_ingested("log", 1);

        Ok(entry)
    }

    /// Persist a batch of log entries as one unit.
    ///
    /// Every entry is validated before storage is touched; the first invalid
    /// entry rejects the whole batch. Returned entries carry their assigned
    /// ids in submission order.
    pub async fn ingest_bulk(&self, entries: Vec<NewLogEntry>) -> Result<Vec<LogEntry>, IngestError> {
        if entries.len() > self.max_bulk_entries {
            return Err(IngestError::BatchTooLarge {
                size: entries.len(),
                max: self.max_bulk_entries,
            });
        }
        if entries.is_empty() {
            debug!("Empty bulk batch, nothing to write");
            return Ok(Vec::new());
        }

        let received_at = models::now();
        let mut validated = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                entry
                    .into_entry(received_at)
                    .map_err(|reason| IngestError::Invalid { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let ids = self.store.insert_logs_atomically(&validated).await?;
        if ids.len() != validated.len() {
            return Err(IngestError::Store(StoreError::CorruptRow(format!(
                "expected {} ids from bulk insert, got {}",
                validated.len(),
                ids.len()
            ))));
        }
        for (entry, id) in validated.iter_mut().zip(ids) {
            entry.id = Some(id);
        }

        info!(count = validated.len(), "Bulk log batch committed");
        metrics::record_ingested("log", validated.len() as u64);

        Ok(validated)
    }

    pub async fn ingest_metric(&self, metric: NewMetric) -> Result<EndpointMetric, IngestError> {
        let mut metric = metric
            .into_metric(models::now())
            .map_err(|reason| IngestError::Invalid { index: 0, reason })?;

        metric.id = Some(self.store.insert_metric(&metric).await?);
        metrics::record_ingested("metric", 1);

        Ok(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{LogFilter, SqliteStore};

    async fn ingestor(max: usize) -> (Ingestor, SqliteStore) {
        let store = SqliteStore::in_memory().await.unwrap();
        (Ingestor::new(Arc::new(store.clone()), max), store)
    }

    fn entry(service: &str, message: &str) -> NewLogEntry {
        NewLogEntry {
            service_name: service.to_string(),
            message: message.to_string(),
            ..Default::default()
        }
    }

    async fn stored(store: &SqliteStore) -> Vec<LogEntry> {
        store.query_logs(&LogFilter::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_one_invalid_entry_rejects_batch() {
        let (ingestor, store) = ingestor(100).await;

        let err = ingestor
            .ingest_bulk(vec![entry("a", "m1"), entry("", "m2")])
            .await
            .unwrap_err();
        match err {
            IngestError::Invalid { index, reason } => {
                assert_eq!(index, 1);
                assert!(reason.contains("service"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(stored(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_returns_ids_in_submission_order() {
        let (ingestor, store) = ingestor(100).await;
        let batch: Vec<_> = (0..6).map(|i| entry("svc", &format!("m{}", i))).collect();

        let written = ingestor.ingest_bulk(batch).await.unwrap();
        assert_eq!(written.len(), 6);
        for (i, e) in written.iter().enumerate() {
            assert_eq!(e.message, format!("m{}", i));
            assert_eq!(e.metadata, serde_json::json!({}));
        }
        let ids: Vec<i64> = written.iter().map(|e| e.id.unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stored(&store).await.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_and_oversized_batches() {
        let (ingestor, store) = ingestor(2).await;

        assert!(ingestor.ingest_bulk(Vec::new()).await.unwrap().is_empty());

        let err = ingestor
            .ingest_bulk(vec![entry("a", "1"), entry("a", "2"), entry("a", "3")])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::BatchTooLarge { size: 3, max: 2 }));
        assert!(stored(&store).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_log_with_invalid_level() {
        let (ingestor, _store) = ingestor(10).await;
        let bad = NewLogEntry {
            log_level: Some("TRACE".to_string()),
            ..entry("svc", "hello")
        };

        assert!(matches!(
            ingestor.ingest_log(bad).await.unwrap_err(),
            IngestError::Invalid { .. }
        ));

        let ok = ingestor.ingest_log(entry("svc", "hello")).await.unwrap();
        assert!(ok.id.is_some());
    }

    #[tokio::test]
    async fn test_ingest_metric() {
        let (ingestor, _store) = ingestor(10).await;
        let metric = NewMetric {
            service_name: "api".to_string(),
            path: "/orders".to_string(),
            method: "post".to_string(),
            status_code: 201,
            duration_ms: 8.25,
            ..Default::default()
        };

        let written = ingestor.ingest_metric(metric).await.unwrap();
        assert!(written.id.is_some());
        assert_eq!(written.method, "POST");
    }
}
