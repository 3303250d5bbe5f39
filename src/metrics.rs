//! Prometheus metrics for the faceswap-gateway server.
//!
//! Counters and histograms for swap outcomes, remote model calls, cache
//! performance, and rate limiting.

use metrics::{counter, histogram};

/// Record a completed swap request with its outcome label and latency.
pub fn record_swap(outcome: &str, duration_ms: u64) {
    counter!("swap_requests_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("swap_duration_ms").record(duration_ms as f64);
}

/// Record a single remote model round-trip.
pub fn record_remote_call(success: bool, duration_ms: u64) {
    counter!("remote_calls_total", "success" => success.to_string()).increment(1);
    histogram!("remote_call_duration_ms").record(duration_ms as f64);
}

/// Record a rejected upload (missing filename or bad extension).
pub fn record_rejected_upload(reason: &str) {
    counter!("rejected_uploads_total", "reason" => reason.to_string()).increment(1);
}

/// Record a rate limit hit.
pub fn record_rate_limit_hit() {
    counter!("rate_limit_hits_total").increment(1);
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!("cache_hits_total").increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!("cache_misses_total").increment(1);
}

/// Install the Prometheus metrics exporter and return the recorder handle.
pub fn install_prometheus_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
