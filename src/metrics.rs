use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all queue metrics
const PREFIX: &str = "action_queue";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref ACTIONS_CLAIMED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_actions_claimed_total"),
        "Total actions claimed from the store"
    ).expect("Failed to create actions_claimed_total metric");

    pub static ref ACTIONS_FINISHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_actions_finished_total"), "Actions that reached a terminal state"),
        &["outcome"]
    ).expect("Failed to create actions_finished_total metric");

    pub static ref ACTION_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_action_attempts_total"), "Execution attempts"),
        &["kind", "result"]
    ).expect("Failed to create action_attempts_total metric");

    pub static ref ACTION_ATTEMPT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_action_attempt_duration_seconds"),
            "Duration of a single execution attempt"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0, 1800.0]),
        &["kind"]
    ).expect("Failed to create action_attempt_duration_seconds metric");

    pub static ref ACTIONS_IN_FLIGHT: Gauge = Gauge::new(
        format!("{PREFIX}_actions_in_flight"),
        "Actions currently tracked by the execution registry"
    ).expect("Failed to create actions_in_flight metric");

    pub static ref ACTION_TIMEOUTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_action_timeouts_total"),
        "Actions cancelled by the reaper after their timeout"
    ).expect("Failed to create action_timeouts_total metric");

    pub static ref BOOKKEEPING_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_bookkeeping_failures_total"),
            "Store writes dropped after exhausting their retries"
        ),
        &["operation"]
    ).expect("Failed to create bookkeeping_failures_total metric");
}

pub fn init_metrics() {
    // ignore errors if already registered (tests)
    let _ = REGISTRY.register(Box::new(ACTIONS_CLAIMED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTIONS_FINISHED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTION_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(ACTION_ATTEMPT_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ACTIONS_IN_FLIGHT.clone()));
    let _ = REGISTRY.register(Box::new(ACTION_TIMEOUTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BOOKKEEPING_FAILURES_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_claimed(count: usize) {
    ACTIONS_CLAIMED_TOTAL.inc_by(count as f64);
}

/// Record one attempt; `result` is "ok" or "error".
pub fn record_attempt(kind: &str, result: &str, duration: Duration) {
    ACTION_ATTEMPTS_TOTAL.with_label_values(&[kind, result]).inc();
    ACTION_ATTEMPT_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

pub fn record_finished(outcome: &str) {
    ACTIONS_FINISHED_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_timeout_cancel() {
    ACTION_TIMEOUTS_TOTAL.inc();
}

pub fn record_bookkeeping_failure(operation: &str) {
    BOOKKEEPING_FAILURES_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn set_in_flight(count: usize) {
    ACTIONS_IN_FLIGHT.set(count as f64);
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}
