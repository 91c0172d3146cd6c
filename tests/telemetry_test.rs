//! Integration tests for telemetry initialization and span helpers.

use plateq::model::{PlateKey, State};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; try_init inside
    // init_telemetry turns a second attempt into an error instead of a panic.
    let config = plateq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "plateq-test".to_string(),
        default_filter: "debug".to_string(),
    };
    if let Ok(guard) = plateq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn lookup_span_creates_and_records_outcome() {
    let key = PlateKey::new("ABC123", "NY");
    let span = plateq::telemetry::work::start_lookup_span(3, &key);
    plateq::telemetry::work::record_outcome(&span, State::Done);
}

#[test]
fn metric_instruments_work_without_a_provider() {
    use opentelemetry::KeyValue;
    use plateq::telemetry::metrics;

    metrics::lookups().add(1, &[KeyValue::new("result", "done")]);
    metrics::batch_size().record(10, &[KeyValue::new("sink", "batched")]);
    metrics::ledger_items().record(5, &[KeyValue::new("state", "pending")]);
}
