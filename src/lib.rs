//! incidentcast - live incident notifications over WebSockets
//!
//! This library matches alerts against users' notification profiles
//! (attribute filters plus weekly time slots) and fans alert create/modify
//! events out to subscribed WebSocket sessions.
//!
//! # Embedding
//!
//! The service only reads alerts and preferences through the
//! [`core::AlertStore`] and [`core::PreferenceStore`] traits. Without
//! overrides, [`app::AppBuilder`] falls back to empty in-memory stores that
//! nothing outside the process can write to, so the stand-alone binary serves
//! empty snapshots. An embedding service keeps its own handle to the store its
//! ingestion path writes to and passes it in:
//!
//! ```no_run
//! # async fn embed() -> anyhow::Result<()> {
//! use incidentcast::{app::App, config::Config, store::InMemoryAlertStore, NewAlert};
//! use std::sync::Arc;
//!
//! let alerts = Arc::new(InMemoryAlertStore::new());
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let app = App::builder(Config::default())
//!     .alert_store(alerts.clone())
//!     .build(shutdown_rx)
//!     .await?;
//!
//! // Every write is pushed to subscribed sessions.
//! alerts.create(NewAlert::new(chrono::Utc::now(), 1, 1, 1));
//!
//! shutdown_tx.send(true)?;
//! app.run().await
//! # }
//! ```

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod internal_metrics;
pub mod profile;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod task_manager;
pub mod time_window;

// Re-export core types for convenience
pub use crate::core::*;
pub use crate::error::{Error, Result};
