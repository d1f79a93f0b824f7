//! The main application logic, decoupled from the entry point.

use crate::{
    auth::TokenAuthenticator,
    config::Config,
    core::{AlertStore, Authenticator, PreferenceStore},
    dispatcher::BroadcastDispatcher,
    internal_metrics::MetricsBuilder,
    registry::{SubscriptionRegistry, Topic},
    server::SessionServer,
    session::SessionContext,
    store::{InMemoryAlertStore, InMemoryPreferenceStore},
    task_manager::TaskManager,
};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    shutdown_grace: Duration,
    local_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    registry: Arc<SubscriptionRegistry>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// The address the WebSocket listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        self.registry.clone()
    }

    /// Waits for the shutdown signal, then gives every task the configured
    /// grace period to finish.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.get_shutdown_rx();
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        let topic = Topic::active_incidents();
        info!(
            subscribed_sessions = self.registry.member_count(&topic),
            "Shutdown signal received. Closing sessions..."
        );

        let report = self.task_manager.shutdown(self.shutdown_grace).await;
        let remaining = self.registry.member_count(&topic);
        if report.is_clean() && remaining == 0 {
            info!(tasks = ?report.graceful, "All tasks shut down gracefully.");
        } else {
            warn!(
                panicked = ?report.panicked,
                aborted = ?report.aborted,
                remaining_sessions = remaining,
                "Shutdown was not clean"
            );
        }
        Ok(())
    }
}

/// Builder for the main application.
///
/// Stores and the authenticator default to the in-memory implementations
/// configured from `Config`; each can be overridden, which is how tests and
/// embedding services plug in their own.
pub struct AppBuilder {
    config: Config,
    alert_store_override: Option<Arc<dyn AlertStore>>,
    preference_store_override: Option<Arc<dyn PreferenceStore>>,
    authenticator_override: Option<Arc<dyn Authenticator>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            alert_store_override: None,
            preference_store_override: None,
            authenticator_override: None,
        }
    }

    /// Uses `store` as the source of alerts and alert events.
    pub fn alert_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.alert_store_override = Some(store);
        self
    }

    /// Uses `store` for notification profiles and user timezones.
    pub fn preference_store(mut self, store: Arc<dyn PreferenceStore>) -> Self {
        self.preference_store_override = Some(store);
        self
    }

    /// Overrides the token table from the configuration.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator_override = Some(authenticator);
        self
    }

    /// Wires every component together and starts the listener.
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new(shutdown_rx);

        // =========================================================================
        // 1. Metrics
        // =========================================================================
        let metrics_addr = match MetricsBuilder::new(config.metrics.clone())
            .build(task_manager.get_shutdown_rx())
        {
            Some((server, addr)) => {
                info!(%addr, "Serving metrics");
                task_manager.spawn("MetricsServer", server.run());
                Some(addr)
            }
            None => None,
        };

        // =========================================================================
        // 2. Stores and authentication
        // =========================================================================
        let site_offset = config.site_offset()?;
        let alerts = self
            .alert_store_override
            .unwrap_or_else(|| Arc::new(InMemoryAlertStore::new()) as Arc<dyn AlertStore>);
        let preferences = self
            .preference_store_override
            .unwrap_or_else(|| Arc::new(InMemoryPreferenceStore::new(site_offset)) as Arc<dyn PreferenceStore>);
        let authenticator = self
            .authenticator_override
            .unwrap_or_else(|| Arc::new(TokenAuthenticator::from_config(&config.auth)) as Arc<dyn Authenticator>);

        // =========================================================================
        // 3. Broadcast wiring
        // =========================================================================
        let registry = Arc::new(SubscriptionRegistry::new());
        alerts.register_observer(Arc::new(BroadcastDispatcher::new(registry.clone())));

        // =========================================================================
        // 4. WebSocket listener
        // =========================================================================
        let listener = TcpListener::bind(config.server.listen_address)
            .await
            .with_context(|| format!("failed to bind {}", config.server.listen_address))?;
        let ctx = SessionContext {
            registry: registry.clone(),
            alerts,
            preferences,
            snapshot_limit: config.sessions.snapshot_limit,
            outbound_capacity: config.sessions.outbound_queue_capacity,
            write_timeout: config.sessions.write_timeout(),
        };
        let server = SessionServer::new(
            listener,
            ctx,
            authenticator,
            &config.server.endpoint_path,
            config.server.handshake_timeout(),
            task_manager.get_shutdown_rx(),
        );
        let local_addr = server.local_addr()?;
        task_manager.spawn("SessionServer", server.run());
        info!(%local_addr, path = %config.server.endpoint_path, "incidentcast ready");

        Ok(App {
            task_manager,
            shutdown_grace: config.server.shutdown_grace(),
            local_addr,
            metrics_addr,
            registry,
        })
    }
}
