#![allow(dead_code)]
//! Alerts, identities and stores shared by the integration tests.
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use incidentcast::core::{Identity, NewAlert};
use incidentcast::registry::SubscriptionRegistry;
use incidentcast::session::SessionContext;
use incidentcast::store::{InMemoryAlertStore, InMemoryPreferenceStore};
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN: &str = "test-token";

pub fn identity() -> Identity {
    Identity {
        user_id: 1,
        username: "operator".to_string(),
    }
}

pub fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

/// 2024-01-01 was a Monday.
pub fn monday_at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, second).unwrap()
}

pub fn new_alert(
    timestamp: DateTime<Utc>,
    source: u64,
    object_type: u64,
    parent_object: Option<u64>,
    problem_type: u64,
) -> NewAlert {
    let mut alert = NewAlert::new(timestamp, source, object_type, problem_type);
    alert.parent_object = parent_object;
    alert
}

pub struct Stores {
    pub registry: Arc<SubscriptionRegistry>,
    pub alerts: Arc<InMemoryAlertStore>,
    pub preferences: Arc<InMemoryPreferenceStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            alerts: Arc::new(InMemoryAlertStore::new()),
            preferences: Arc::new(InMemoryPreferenceStore::new(utc())),
        }
    }

    pub fn context(&self, outbound_capacity: usize) -> SessionContext {
        SessionContext {
            registry: self.registry.clone(),
            alerts: self.alerts.clone(),
            preferences: self.preferences.clone(),
            snapshot_limit: 25,
            outbound_capacity,
            write_timeout: Duration::from_secs(5),
        }
    }
}
