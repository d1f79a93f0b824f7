//! Configuration management for incidentcast
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, an optional
//! `incidentcast.toml` file, `INCIDENTCAST_` environment variables and finally
//! command-line flags.

use crate::cli::Cli;
use crate::core::Identity;
use anyhow::{Context, Result};
use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "incidentcast.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application, as an `EnvFilter` directive.
    pub log_level: String,
    /// The WebSocket listener.
    pub server: ServerConfig,
    /// Per-session limits.
    pub sessions: SessionsConfig,
    /// Wall-clock settings for time-slot matching.
    pub time: TimeConfig,
    /// Static token authentication.
    pub auth: AuthConfig,
    /// The Prometheus exporter.
    pub metrics: MetricsConfig,
}

/// Configuration for the WebSocket listener.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to accept client connections on.
    pub listen_address: SocketAddr,
    /// The only request path upgraded to a WebSocket.
    pub endpoint_path: String,
    /// How long a client may take to complete the upgrade handshake.
    pub handshake_timeout_ms: u64,
    /// How long shutdown waits for tasks before aborting them.
    pub shutdown_grace_ms: u64,
}

/// Configuration for connected sessions.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SessionsConfig {
    /// Maximum number of incidents in a `list` or `subscribe` snapshot.
    pub snapshot_limit: usize,
    /// Events buffered per session before it is evicted as too slow.
    pub outbound_queue_capacity: usize,
    /// A single frame write that takes longer than this closes the session.
    pub write_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimeConfig {
    /// UTC offset (e.g. `+01:00`) used for users without their own.
    pub site_timezone: String,
}

/// Configuration for token authentication.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct AuthConfig {
    /// Maps an API token to the identity it authenticates.
    #[serde(default)]
    pub tokens: BTreeMap<String, Identity>,
}

/// Configuration for the metrics system.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether to install the Prometheus recorder and serve `/metrics`.
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl SessionsConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Config {
    /// Loads the application configuration by layering sources.
    ///
    /// # Arguments
    /// * `cli` - Parsed command-line flags; `cli.config` overrides the TOML file path.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            // A missing file is not an error; defaults apply.
            .merge(Toml::file(path))
            // e.g. INCIDENTCAST_SESSIONS__SNAPSHOT_LIMIT=50
            .merge(Env::prefixed("INCIDENTCAST_").split("__"))
            .merge(cli.clone())
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// The configured site offset.
    pub fn site_offset(&self) -> Result<FixedOffset> {
        self.time
            .site_timezone
            .parse::<FixedOffset>()
            .with_context(|| format!("invalid site_timezone {:?}", self.time.site_timezone))
    }

    fn validate(&self) -> Result<()> {
        self.site_offset()?;
        if !self.server.endpoint_path.starts_with('/') {
            anyhow::bail!(
                "server.endpoint_path must start with '/', got {:?}",
                self.server.endpoint_path
            );
        }
        if self.sessions.outbound_queue_capacity == 0 {
            anyhow::bail!("sessions.outbound_queue_capacity must be at least 1");
        }
        if self.sessions.write_timeout_ms == 0 || self.server.handshake_timeout_ms == 0 {
            anyhow::bail!("sessions.write_timeout_ms and server.handshake_timeout_ms must be non-zero");
        }
        Ok(())
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            server: ServerConfig {
                listen_address: SocketAddr::from(([127, 0, 0, 1], 8001)),
                endpoint_path: "/active/".to_string(),
                handshake_timeout_ms: 10_000,
                shutdown_grace_ms: 5_000,
            },
            sessions: SessionsConfig {
                snapshot_limit: 25,
                outbound_queue_capacity: 256,
                write_timeout_ms: 10_000,
            },
            time: TimeConfig {
                site_timezone: "+00:00".to_string(),
            },
            auth: AuthConfig::default(),
            metrics: MetricsConfig {
                enabled: false,
                listen_address: SocketAddr::from(([127, 0, 0, 1], 9090)),
            },
        }
    }
}
