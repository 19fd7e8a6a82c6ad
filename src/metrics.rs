//! Prometheus metrics collection for contacts-api.
//!
//! Metrics are exposed on a separate listener (`server.metrics_port`) at
//! `/metrics`.
//!
//! - `http_requests_total{method,route,status}` - Requests served
//! - `http_request_duration_seconds{method,route}` - Request latency histogram
//! - `http_errors_total{code}` - Error responses by error code
//! - `http_rate_limited_total{route}` - Requests rejected by the rate limiter
//! - `http_banned_total` - Requests rejected by the IP ban list
//! - `auth_failures_total{reason}` - Token and credential failures
//! - `user_cache_total{result}` - User cache hits, misses and errors
//! - `emails_sent_total{kind,result}` - Outgoing e-mail attempts

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Requests served, by method, matched route and status code.
pub static HTTP_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Error responses by `ApiError::error_code`.
pub static HTTP_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Requests rejected by the rate limiter, by route class.
pub static RATE_LIMITED: OnceLock<IntCounterVec> = OnceLock::new();

/// Requests rejected because the client IP is banned.
pub static BANNED: OnceLock<IntCounter> = OnceLock::new();

/// Authentication failures by reason.
pub static AUTH_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

/// User cache lookups by result (`hit`, `miss`, `error`).
pub static USER_CACHE: OnceLock<IntCounterVec> = OnceLock::new();

/// Outgoing e-mail by kind and result.
pub static EMAILS_SENT: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

/// Request latency by method and route.
pub static HTTP_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at startup before any metrics are recorded; repeated
/// calls are harmless.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                let m = $init.expect(concat!(stringify!($metric), " creation failed"));
                if let Err(e) = r.register(Box::new(m.clone())) {
                    tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                }
                let _ = $metric.set(m);
            }
        };
    }

    register!(HTTP_REQUESTS, IntCounterVec::new(Opts::new("http_requests_total", "HTTP requests served"), &["method", "route", "status"]));
    register!(HTTP_LATENCY, HistogramVec::new(
        HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "route"]));
    register!(HTTP_ERRORS, IntCounterVec::new(Opts::new("http_errors_total", "HTTP error responses"), &["code"]));
    register!(RATE_LIMITED, IntCounterVec::new(Opts::new("http_rate_limited_total", "Requests rejected by the rate limiter"), &["route"]));
    register!(BANNED, IntCounter::new("http_banned_total", "Requests rejected from banned addresses"));
    register!(AUTH_FAILURES, IntCounterVec::new(Opts::new("auth_failures_total", "Authentication failures"), &["reason"]));
    register!(USER_CACHE, IntCounterVec::new(Opts::new("user_cache_total", "User cache lookups"), &["result"]));
    register!(EMAILS_SENT, IntCounterVec::new(Opts::new("emails_sent_total", "Outgoing e-mail"), &["kind", "result"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

fn inc_labeled(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

/// Record a finished request with its latency.
#[inline]
pub fn record_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    inc_labeled(&HTTP_REQUESTS, &[method, route, &status.to_string()]);
    if let Some(h) = HTTP_LATENCY.get() {
        h.with_label_values(&[method, route]).observe(duration_secs);
    }
}

#[inline]
pub fn record_error(code: &str) {
    inc_labeled(&HTTP_ERRORS, &[code]);
}

#[inline]
pub fn record_rate_limited(route_class: &str) {
    inc_labeled(&RATE_LIMITED, &[route_class]);
}

#[inline]
pub fn record_banned() {
    if let Some(c) = BANNED.get() {
        c.inc();
    }
}

#[inline]
pub fn record_auth_failure(reason: &str) {
    inc_labeled(&AUTH_FAILURES, &[reason]);
}

#[inline]
pub fn record_cache(result: &str) {
    inc_labeled(&USER_CACHE, &[result]);
}

#[inline]
pub fn record_email(kind: &str, result: &str) {
    inc_labeled(&EMAILS_SENT, &[kind, result]);
}
