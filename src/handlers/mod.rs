pub mod health;
pub mod logs;
pub mod metrics;
pub mod prometheus;
pub mod traces;

use std::sync::Arc;

use crate::telemetry::{Ingestor, LifecycleManager, TelemetryStore};

/// Shared state for the telemetry API handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
    pub lifecycle: LifecycleManager,
    pub ingestor: Ingestor,
}

impl AppState {
    pub fn new(store: Arc<dyn TelemetryStore>, max_bulk_entries: usize) -> Self {
        Self {
            lifecycle: LifecycleManager::new(Arc::clone(&store)),
            ingestor: Ingestor::new(Arc::clone(&store), max_bulk_entries),
            store,
        }
    }
}
