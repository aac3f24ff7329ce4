//! Prometheus series for HTTP traffic, the TTL caches and the relay.

use axum::http::{Method, StatusCode};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Upper bounds for request latency, in seconds. The slowest route waits on
/// the partner server, whose timeout defaults to 10s.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub mod names {
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";

    pub const COMMISSIONS_RECORDED_TOTAL: &str = "commissions_recorded_total";
    pub const RELAY_REQUESTS_TOTAL: &str = "relay_requests_total";
}

/// Installs the Prometheus recorder. Repeat calls keep the first recorder.
///
/// Nothing is pushed or served on a side port; `/metrics/prometheus` renders
/// the handle on demand.
pub fn init_metrics() -> Result<(), BuildError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;
    if PROMETHEUS_HANDLE.set(handle).is_ok() {
        tracing::info!("Prometheus recorder installed");
    }
    Ok(())
}

/// Prometheus text exposition, or `None` before [`init_metrics`] ran.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

/// Coarse status label, e.g. `"4xx"`.
fn status_class(status: StatusCode) -> &'static str {
    if status.is_success() {
        "2xx"
    } else if status.is_redirection() {
        "3xx"
    } else if status.is_client_error() {
        "4xx"
    } else if status.is_server_error() {
        "5xx"
    } else {
        "1xx"
    }
}

pub fn record_http_request(method: &Method, path: &str, status: StatusCode, elapsed: Duration) {
    let method = method.as_str().to_owned();
    let route = normalize_path(path);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.clone(),
        "path" => route.clone()
    )
    .record(elapsed.as_secs_f64());
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method,
        "path" => route,
        "status" => status.as_str().to_owned(),
        "status_class" => status_class(status)
    )
    .increment(1);
}

/// Cache lookups, labelled by cache name.
pub fn record_cache_hit(cache: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

/// Live entry count, refreshed by every sweep.
pub fn set_cache_entries(cache: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "cache" => cache).set(count as f64);
}

pub fn record_commission_recorded() {
    counter!(names::COMMISSIONS_RECORDED_TOTAL).increment(1);
}

/// Outcome of a relayed purchase (`success`, `timeout`, ...).
pub fn record_relay_outcome(outcome: &'static str) {
    counter!(names::RELAY_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Normalize a path to reduce cardinality.
///
/// `/affiliates/<id>` collapses to `/affiliates/{id}`.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|part| if is_likely_id(part) { "{id}" } else { part })
        .collect::<Vec<_>>()
        .join("/")
}

/// Check if a string looks like an ID (UUID or numeric).
fn is_likely_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }

    // UUID pattern (with or without dashes)
    if s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4 {
        return true;
    }
    if s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }

    // Numeric ID
    s.chars().all(|c| c.is_ascii_digit())
}
