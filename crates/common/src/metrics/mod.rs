//! Metrics and observability utilities
//!
//! Counters and histograms for the ingestion pipeline and fetcher, all
//! prefixed with [`METRICS_PREFIX`]. Recording is a no-op until a
//! recorder (the Prometheus exporter in the gateway) is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all PubTrack metrics
pub const METRICS_PREFIX: &str = "pubtrack";

/// Buckets for whole ingestion runs (in seconds)
pub const INGESTION_BUCKETS: &[f64] = &[
    1.0,
    5.0,
    15.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
    1800.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_publications_added_total", METRICS_PREFIX),
        Unit::Count,
        "Publications created by ingestion"
    );

    describe_counter!(
        format!("{}_entry_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Entries rolled back because they failed to persist or were malformed"
    );

    describe_counter!(
        format!("{}_checkpoints_total", METRICS_PREFIX),
        Unit::Count,
        "Intermediate commits of the ingestion unit of work"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Wall time of a full ingestion run"
    );

    describe_counter!(
        format!("{}_fetch_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Bibliography fetch attempts by outcome"
    );

    tracing::info!("Metrics registered");
}

/// Record a newly created publication
pub fn record_publication_added(source_tag: &str) {
    counter!(
        format!("{}_publications_added_total", METRICS_PREFIX),
        "source" => source_tag.to_string()
    )
    .increment(1);
}

/// Record an entry that was rolled back
pub fn record_entry_error(reason: &str) {
    counter!(
        format!("{}_entry_errors_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_checkpoint() {
    counter!(format!("{}_checkpoints_total", METRICS_PREFIX)).increment(1);
}

/// Record a finished ingestion run
pub fn record_ingestion(duration_secs: f64, outcome: &str) {
    histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// Record one HTTP attempt against the bibliography service
pub fn record_fetch(status: &str) {
    counter!(
        format!("{}_fetch_requests_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingestion_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in INGESTION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every helper must be a silent no-op
        record_publication_added("a/1");
        record_entry_error("persist");
        record_checkpoint();
        record_ingestion(0.5, "succeeded");
        record_fetch("200");
    }
}
