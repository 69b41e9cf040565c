//! Prometheus metrics for the notification client.

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};
use tracing::warn;

/// Metric name prefix for all planner notification metrics
const PREFIX: &str = "planner_notify";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Push ingestion
    pub static ref PUSH_MESSAGES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_push_messages_total"), "Pushed notifications by outcome"),
        &["outcome"]
    ).expect("Failed to create push_messages_total metric");

    // Connection
    pub static ref RECONNECT_ATTEMPTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_reconnect_attempts_total"),
        "Reconnection attempts to the push channel"
    ).expect("Failed to create reconnect_attempts_total metric");

    pub static ref HEARTBEAT_TIMEOUTS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_heartbeat_timeouts_total"),
        "Push connections dropped for missing heartbeats"
    ).expect("Failed to create heartbeat_timeouts_total metric");

    pub static ref CONNECTION_UP: IntGauge = IntGauge::new(
        format!("{PREFIX}_connection_up"),
        "1 while the push channel is connected"
    ).expect("Failed to create connection_up metric");

    // REST
    pub static ref API_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_api_failures_total"), "Failed notification service calls"),
        &["operation"]
    ).expect("Failed to create api_failures_total metric");

    // Store
    pub static ref UNREAD_COUNT: IntGauge = IntGauge::new(
        format!("{PREFIX}_unread_count"),
        "Unread notifications in the store"
    ).expect("Failed to create unread_count metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PUSH_MESSAGES_TOTAL.clone()),
        Box::new(RECONNECT_ATTEMPTS_TOTAL.clone()),
        Box::new(HEARTBEAT_TIMEOUTS_TOTAL.clone()),
        Box::new(CONNECTION_UP.clone()),
        Box::new(API_FAILURES_TOTAL.clone()),
        Box::new(UNREAD_COUNT.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                warn!("Failed to register metric: {}", e);
            }
        }
    }
}

pub fn record_push(outcome: &str) {
    PUSH_MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_api_failure(operation: &str) {
    API_FAILURES_TOTAL.with_label_values(&[operation]).inc();
}

/// Render the registry in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
