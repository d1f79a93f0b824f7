//! Notification profiles: a time slot, a set of filters and an on/off switch.

use crate::core::{Alert, AlertStore, UserId};
use crate::error::{Error, Result};
use crate::filter::{AttributeFilter, FilterCriteria};
use crate::time_window::TimeSlot;
use chrono::FixedOffset;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Media a profile wants notifications on. Stored and reported only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Media {
    #[serde(rename = "EM")]
    Email,
    #[serde(rename = "SM")]
    Sms,
    #[serde(rename = "SL")]
    Slack,
}

/// A profile as persisted: references by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: u64,
    pub owner: UserId,
    pub time_slot: u64,
    pub filters: BTreeSet<u64>,
    #[serde(default = "default_media")]
    pub media: BTreeSet<Media>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_media() -> BTreeSet<Media> {
    BTreeSet::from([Media::Email])
}

fn default_active() -> bool {
    true
}

impl ProfileRecord {
    pub fn new(id: u64, owner: UserId, time_slot: u64) -> Self {
        Self {
            id,
            owner,
            time_slot,
            filters: BTreeSet::new(),
            media: default_media(),
            active: true,
        }
    }

    pub fn with_filter(mut self, filter_id: u64) -> Self {
        self.filters.insert(filter_id);
        self
    }
}

/// A profile with its time slot and filters resolved.
#[derive(Debug, Clone)]
pub struct NotificationProfile {
    pub id: u64,
    pub owner: UserId,
    pub time_slot: TimeSlot,
    pub filters: Vec<AttributeFilter>,
    pub media: BTreeSet<Media>,
    pub active: bool,
    /// Offset used to turn alert timestamps into local wall-clock time.
    pub timezone: FixedOffset,
}

impl NotificationProfile {
    /// Resolves a record against its time slot and filters.
    ///
    /// Every referenced object must belong to the record's owner.
    pub fn assemble(
        record: ProfileRecord,
        time_slot: TimeSlot,
        filters: Vec<AttributeFilter>,
        timezone: FixedOffset,
    ) -> Result<Self> {
        if time_slot.owner != record.owner {
            return Err(Error::OwnershipViolation {
                kind: "time slot",
                id: time_slot.id,
                owner: record.owner,
            });
        }
        if let Some(foreign) = filters.iter().find(|f| f.owner != record.owner) {
            return Err(Error::OwnershipViolation {
                kind: "filter",
                id: foreign.id,
                owner: record.owner,
            });
        }
        Ok(Self {
            id: record.id,
            owner: record.owner,
            time_slot,
            filters,
            media: record.media,
            active: record.active,
            timezone,
        })
    }

    /// Whether `alert` concerns this profile: active, inside the time slot and
    /// matched by at least one filter. No filters means nothing matches.
    pub fn relevant_now(&self, alert: &Alert) -> bool {
        self.active
            && self
                .time_slot
                .contains(&alert.timestamp.with_timezone(&self.timezone))
            && self.filters.iter().any(|filter| filter.matches(alert))
    }

    /// The open alerts currently relevant to this profile, newest first.
    ///
    /// Each filter's criteria are pushed down to the store; the union is then
    /// re-checked with `relevant_now`, so the result is exactly the naive
    /// per-alert evaluation over open alerts.
    pub async fn current_matches(&self, store: &dyn AlertStore) -> Result<Vec<Alert>> {
        if !self.active || self.filters.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for filter in &self.filters {
            candidates.extend(store.open_alerts_matching(&filter.criteria).await?);
        }
        let matches: Vec<Alert> = candidates
            .into_iter()
            .unique_by(|alert| alert.pk)
            .filter(|alert| alert.active_state && self.relevant_now(alert))
            .sorted_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.pk.cmp(&a.pk)))
            .collect();

        debug!(
            profile_id = self.id,
            owner = self.owner,
            count = matches.len(),
            "Computed current matches for profile"
        );
        Ok(matches)
    }
}

/// The open alerts an unsaved filter would match, newest first.
pub async fn preview(store: &dyn AlertStore, criteria: &FilterCriteria) -> Result<Vec<Alert>> {
    store.open_alerts_matching(criteria).await
}
