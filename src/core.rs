//! Core domain types and service traits for incidentcast
//!
//! This module defines the alert record this service reacts to, the identity
//! attached to each connection, and the trait contracts for the external
//! collaborators (alert store, preference store, authenticator).

use crate::error::Result;
use crate::filter::FilterCriteria;
use crate::profile::NotificationProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type AlertId = u64;
pub type UserId = u64;
pub type SourceId = u64;
pub type ObjectId = u64;
pub type ObjectTypeId = u64;
pub type ParentObjectId = u64;
pub type ProblemTypeId = u64;

/// An incident reported by a monitored system.
///
/// This is also the serialized payload of every alert pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub pk: AlertId,
    pub timestamp: DateTime<Utc>,
    /// The source system that the incident originated in.
    pub source: SourceId,
    /// The id the source system uses for this incident.
    pub source_incident_id: String,
    /// The most specific object that the incident is about.
    pub object: ObjectId,
    pub object_type: ObjectTypeId,
    /// An object that `object` is possibly a part of.
    pub parent_object: Option<ParentObjectId>,
    pub problem_type: ProblemTypeId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details_url: String,
    /// URL to an existing ticket in a ticketing system.
    #[serde(default)]
    pub ticket_url: String,
    /// Whether the incident is still open.
    pub active_state: bool,
}

/// The fields an ingestion pipeline supplies when creating an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub timestamp: DateTime<Utc>,
    pub source: SourceId,
    pub source_incident_id: String,
    pub object: ObjectId,
    pub object_type: ObjectTypeId,
    pub parent_object: Option<ParentObjectId>,
    pub problem_type: ProblemTypeId,
    pub description: String,
    pub details_url: String,
    pub ticket_url: String,
}

impl NewAlert {
    /// A minimal open incident, mostly useful for seeding and tests.
    pub fn new(
        timestamp: DateTime<Utc>,
        source: SourceId,
        object_type: ObjectTypeId,
        problem_type: ProblemTypeId,
    ) -> Self {
        Self {
            timestamp,
            source,
            source_incident_id: String::new(),
            object: 0,
            object_type,
            parent_object: None,
            problem_type,
            description: String::new(),
            details_url: String::new(),
            ticket_url: String::new(),
        }
    }
}

/// The authenticated user behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

// =============================================================================
// Service Traits
// =============================================================================

/// Receives every committed alert create/modify.
///
/// Invoked by the alert store exactly once per committed write, after the new
/// state is visible to subsequent reads and in commit order. Implementations
/// must not block.
pub trait AlertObserver: Send + Sync {
    fn alert_saved(&self, alert: &Alert, created: bool);
}

/// Read access to alerts plus the write hook registration.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Up to `limit` open alerts, newest first.
    async fn active_alerts(&self, limit: usize) -> Result<Vec<Alert>>;

    /// Every open alert satisfying `criteria`, newest first.
    ///
    /// Must honour the wildcard convention for empty criteria sets exactly as
    /// `FilterCriteria::matches` does.
    async fn open_alerts_matching(&self, criteria: &FilterCriteria) -> Result<Vec<Alert>>;

    /// Registers an observer for committed writes.
    fn register_observer(&self, observer: Arc<dyn AlertObserver>);
}

/// Read-only, owner-scoped access to notification preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Loads and assembles one profile owned by `owner`, evaluated in the
    /// owner's timezone or the site's when the owner has none.
    ///
    /// Returns `Error::NotFound` when the profile does not exist or belongs to
    /// someone else.
    async fn notification_profile(
        &self,
        owner: UserId,
        profile_id: u64,
    ) -> Result<NotificationProfile>;
}

/// Resolves an opaque connection token to an identity.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Identity>;
}
