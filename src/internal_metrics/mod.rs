//! # Internal Metrics Module
//!
//! Metric names are recorded with the `metrics` macros at their call sites.
//! This module describes them and, when enabled, installs the Prometheus
//! recorder and builds the `/metrics` server.
//!
//! - **`MetricsBuilder`**: installs the recorder and binds the server.
//! - **`MetricsServer`**: (defined in `server.rs`) an `axum` server exposing
//!   the `/metrics` endpoint.

use crate::config::MetricsConfig;
use crate::internal_metrics::server::MetricsServer;
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub mod server;

/// Registers descriptions for every metric this crate records.
pub fn describe() {
    metrics::describe_counter!("sessions_opened_total", Unit::Count, "Total number of sessions that completed the handshake with a valid identity.");
    metrics::describe_counter!("sessions_rejected_total", Unit::Count, "Total number of connections refused for missing or invalid credentials.");
    metrics::describe_gauge!("sessions_active", Unit::Count, "The current number of open sessions.");
    metrics::describe_gauge!("topic_members", Unit::Count, "The current number of sessions joined to each topic.");
    metrics::describe_counter!("events_published_total", Unit::Count, "Total number of created/modified events published.");
    metrics::describe_counter!("event_deliveries_total", Unit::Count, "Total number of events queued to individual sessions.");
    metrics::describe_counter!("session_evictions_total", Unit::Count, "Total number of sessions evicted because their queue was full or closed.");
    metrics::describe_counter!("session_write_timeouts_total", Unit::Count, "Total number of sessions closed because a client stopped reading.");
    metrics::describe_counter!("handshake_timeouts_total", Unit::Count, "Total number of connections dropped for not completing the handshake in time.");
    metrics::describe_counter!("protocol_errors_total", Unit::Count, "Total number of inbound messages rejected as malformed or unknown.");
    metrics::describe_histogram!("snapshot_duration_seconds", Unit::Seconds, "The time taken to read an incident snapshot from the store.");
}

/// Builder for the metrics system.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and returns the server to spawn.
    ///
    /// Returns `None` when metrics are disabled or the exporter could not be
    /// set up; recording then goes to the no-op recorder.
    pub fn build(
        self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<(MetricsServer, SocketAddr)> {
        if !self.config.enabled {
            return None;
        }

        let recorder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        ) {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!("Failed to configure Prometheus recorder: {}", e);
                return None;
            }
        };
        let handle = recorder.handle();

        let listener = match bind(self.config.listen_address) {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return None;
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return None;
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return None;
        }
        describe();

        Some((MetricsServer::new(listener, handle, shutdown_rx), addr))
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    // The listener must be non-blocking to be used with Tokio.
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}
