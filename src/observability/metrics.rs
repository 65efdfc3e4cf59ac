//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define runtime metrics (offloads, rejections, classified failures,
//!   proxy tunnels, requests, connections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `conduit_offload_total` (counter): stage executions by stage, offloaded
//! - `conduit_executor_rejections_total` (counter): refused submissions by executor
//! - `conduit_classified_errors_total` (counter): failures by kind, retryable
//! - `conduit_proxy_connect_total` (counter): CONNECT attempts by outcome
//! - `conduit_requests_total` (counter): served requests by method, status
//! - `conduit_request_duration_seconds` (histogram): latency distribution
//! - `conduit_active_connections` (gauge): current connection count
//!
//! # Design Decisions
//! - Without an installed recorder every update is a no-op
//! - Labels are static strings or small closed sets

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::execution::Stage;
use crate::failure::ErrorKind;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_offload(stage: Stage, offloaded: bool) {
    counter!(
        "conduit_offload_total",
        "stage" => stage.as_str(),
        "offloaded" => if offloaded { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_executor_rejection(executor: &str) {
    counter!("conduit_executor_rejections_total", "executor" => executor.to_owned()).increment(1);
}

pub fn record_classified(kind: ErrorKind, retryable: bool) {
    counter!(
        "conduit_classified_errors_total",
        "kind" => kind.as_str(),
        "retryable" => if retryable { "true" } else { "false" }
    )
    .increment(1);
}

/// `outcome` is one of `established`, `rejected`, `malformed`, `io_error`.
pub fn record_proxy_connect(outcome: &'static str) {
    counter!("conduit_proxy_connect_total", "outcome" => outcome).increment(1);
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "conduit_requests_total",
        "method" => method.to_owned(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("conduit_request_duration_seconds", "method" => method.to_owned())
        .record(start.elapsed().as_secs_f64());
}

pub fn connection_opened() {
    gauge!("conduit_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("conduit_active_connections").decrement(1.0);
}
