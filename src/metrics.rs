use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus metrics exporter
///
/// Fails if a global recorder is already installed (e.g., in tests)
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(
        "telemetry_admission_total",
        "Requests seen by the admission controller, by outcome"
    );
    describe_counter!(
        "telemetry_auth_total",
        "Authentication and authorization decisions, by outcome"
    );
    describe_counter!(
        "telemetry_ingested_records_total",
        "Telemetry records persisted, by kind"
    );
    describe_counter!(
        "telemetry_lifecycle_transitions_total",
        "Trace and span state transitions"
    );
    describe_gauge!(
        "telemetry_gateway_info",
        "Gateway version and build information"
    );

    gauge!("telemetry_gateway_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record an admission decision ("admitted" or "rejected")
pub fn record_admission(outcome: &'static str) {
    counter!("telemetry_admission_total", "outcome" => outcome).increment(1);
}

/// Record an auth decision ("authenticated", "unauthenticated", "forbidden", "disabled")
pub fn record_auth(outcome: &'static str) {
    counter!("telemetry_auth_total", "outcome" => outcome).increment(1);
}

pub fn record_ingested(kind: &'static str, count: u64) {
    counter!("telemetry_ingested_records_total", "kind" => kind).increment(count);
}

pub fn record_lifecycle_transition(entity: &'static str, transition: &'static str) {
    counter!(
        "telemetry_lifecycle_transitions_total",
        "entity" => entity,
        "transition" => transition,
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        init_metric_descriptions();

        record_admission("admitted");
        record_admission("rejected");
        record_auth("forbidden");
        record_ingested("log", 10);
        record_lifecycle_transition("trace", "end");

        // Without an installed recorder these are no-ops; they must not panic
    }

    #[test]
    fn test_local_recorder_renders_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_ingested("log", 3);
        });

        let rendered = handle.render();
        assert!(rendered.contains("telemetry_ingested_records_total"));
    }
}
