//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_active_connections` (gauge): connections currently proxied
//! - `proxy_filter_actions_total` (counter): chain outcomes by direction, action
//! - `proxy_parse_errors_total` (counter): malformed input by side
//! - `proxy_backend_failures_total` (counter): backend connect failures
//! - `proxy_bytes_total` (counter): bytes relayed by direction
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   exporter every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::filtering::ActionKind;

/// Install the Prometheus exporter serving `/metrics` on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_opened() {
    metrics::counter!("proxy_connections_total").increment(1);
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_closed() {
    metrics::gauge!("proxy_active_connections").decrement(1.0);
}

/// `direction` is `"request"` or `"response"`.
pub fn record_filter_action(direction: &'static str, kind: ActionKind) {
    metrics::counter!(
        "proxy_filter_actions_total",
        "direction" => direction,
        "action" => kind.as_str()
    )
    .increment(1);
}

/// `side` is `"client"` or `"backend"`.
pub fn record_parse_error(side: &'static str) {
    metrics::counter!("proxy_parse_errors_total", "side" => side).increment(1);
}

pub fn record_backend_failure() {
    metrics::counter!("proxy_backend_failures_total").increment(1);
}

/// `direction` is `"upstream"` (to the client) or `"downstream"` (to the backend).
pub fn record_bytes(direction: &'static str, bytes: usize) {
    metrics::counter!("proxy_bytes_total", "direction" => direction).increment(bytes as u64);
}
