//! Metric instrument factories for plateq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"plateq"` meter; without an
//! exporter they are no-ops.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("plateq")
}

/// Counter: identifiers offered to the ledger by add-work.
/// Labels: `result` ("added" | "existed" | "dry_run").
pub fn plates_added() -> Counter<u64> {
    meter()
        .u64_counter("plateq.plates.added")
        .with_description("Identifiers offered to the ledger")
        .build()
}

/// Counter: lookups performed by workers.
/// Labels: `result` ("done" | "error").
pub fn lookups() -> Counter<u64> {
    meter()
        .u64_counter("plateq.lookups")
        .with_description("Lookups performed")
        .build()
}

/// Histogram: lookup latency in milliseconds.
pub fn lookup_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("plateq.lookup.duration_ms")
        .with_description("Lookup duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: records written back to the ledger.
/// Labels: `sink` ("direct" | "batched" | "adds"), `result` ("applied" | "stale" | "failed").
pub fn ledger_writes() -> Counter<u64> {
    meter()
        .u64_counter("plateq.ledger.writes")
        .with_description("Records written to the ledger")
        .build()
}

/// Histogram: records per flushed transaction.
/// Labels: `sink`.
pub fn batch_size() -> Histogram<u64> {
    meter()
        .u64_histogram("plateq.batch.size")
        .with_description("Records per flushed transaction")
        .build()
}

/// Counter: work queue refills.
/// Labels: `result` ("items" | "empty" | "error").
pub fn queue_refills() -> Counter<u64> {
    meter()
        .u64_counter("plateq.queue.refills")
        .with_description("Work queue refills")
        .build()
}

/// Gauge: ledger records per state, as last sampled by the monitor.
/// Labels: `state`.
pub fn ledger_items() -> Gauge<u64> {
    meter()
        .u64_gauge("plateq.ledger.items")
        .with_description("Ledger records per state")
        .build()
}
