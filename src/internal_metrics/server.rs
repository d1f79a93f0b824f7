//! The `/metrics` scrape endpoint.

use axum::{extract::State, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Wraps an already-bound listener; nothing is served until `run`.
    pub fn new(
        listener: TcpListener,
        prom_handle: PrometheusHandle,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Serves scrapes until shutdown, letting in-flight scrapes complete.
    pub fn run(self) -> impl Future<Output = ()> {
        let app = Router::new()
            .route("/metrics", get(render))
            .with_state(self.prom_handle);
        let mut shutdown_rx = self.shutdown_rx;

        async move {
            let shutdown = async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Metrics server error: {}", e);
            }
            debug!("Metrics server stopped.");
        }
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
