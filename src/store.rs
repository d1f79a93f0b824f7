//! In-memory reference implementations of the alert and preference stores.
//!
//! The service only reads through the `AlertStore` / `PreferenceStore` traits;
//! the write methods here stand in for the ingestion pipeline and the
//! preference management surface.

use crate::core::{
    Alert, AlertId, AlertObserver, AlertStore, NewAlert, PreferenceStore, UserId,
};
use crate::error::{Error, Result};
use crate::filter::{AttributeFilter, FilterCriteria};
use crate::profile::{NotificationProfile, ProfileRecord};
use crate::time_window::TimeSlot;
use async_trait::async_trait;
use chrono::FixedOffset;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace};

/// Alerts kept in memory, keyed by id.
///
/// Notifications are queued in commit order while the write lock is held and
/// delivered by whichever writer is not already draining the queue. Observers
/// therefore see writes in the order they were committed, even when a later
/// write happens on another thread (or from inside an observer) before an
/// earlier notification has finished.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<BTreeMap<AlertId, Alert>>,
    observers: Mutex<Vec<Arc<dyn AlertObserver>>>,
    outbox: Mutex<Outbox>,
}

#[derive(Default)]
struct Outbox {
    pending: VecDeque<(Alert, bool)>,
    draining: bool,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persists a new open alert and notifies observers with `created = true`.
    pub fn create(&self, new: NewAlert) -> Alert {
        let alert = {
            let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
            let pk = alerts.keys().next_back().map_or(1, |last| last + 1);
            let alert = Alert {
                pk,
                timestamp: new.timestamp,
                source: new.source,
                source_incident_id: new.source_incident_id,
                object: new.object,
                object_type: new.object_type,
                parent_object: new.parent_object,
                problem_type: new.problem_type,
                description: new.description,
                details_url: new.details_url,
                ticket_url: new.ticket_url,
                active_state: true,
            };
            alerts.insert(pk, alert.clone());
            self.enqueue(&alert, true);
            alert
        };
        debug!(alert_id = alert.pk, "Alert created");
        self.drain();
        alert
    }

    /// Applies `change` to an existing alert and notifies observers with
    /// `created = false`.
    pub fn modify<F>(&self, pk: AlertId, change: F) -> Result<Alert>
    where
        F: FnOnce(&mut Alert),
    {
        let alert = {
            let mut alerts = self.alerts.write().unwrap_or_else(PoisonError::into_inner);
            let alert = alerts
                .get_mut(&pk)
                .ok_or(Error::NotFound { kind: "alert", id: pk })?;
            change(alert);
            // The id is the key; a closure must not move the alert.
            alert.pk = pk;
            let alert = alert.clone();
            self.enqueue(&alert, false);
            alert
        };
        debug!(alert_id = pk, active = alert.active_state, "Alert modified");
        self.drain();
        Ok(alert)
    }

    /// Marks an alert as no longer open.
    pub fn resolve(&self, pk: AlertId) -> Result<Alert> {
        self.modify(pk, |alert| alert.active_state = false)
    }

    /// Marks a resolved alert as open again.
    pub fn reopen(&self, pk: AlertId) -> Result<Alert> {
        self.modify(pk, |alert| alert.active_state = true)
    }

    pub fn get(&self, pk: AlertId) -> Option<Alert> {
        self.alerts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pk)
            .cloned()
    }

    /// Must be called with the alerts write lock held.
    fn enqueue(&self, alert: &Alert, created: bool) {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .push_back((alert.clone(), created));
    }

    /// Delivers queued notifications unless another caller already is.
    ///
    /// Runs with no store lock held, so observers can read the new state.
    fn drain(&self) {
        {
            let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        loop {
            let next = {
                let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
                match outbox.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.notify(&next.0, next.1);
        }
    }

    fn notify(&self, alert: &Alert, created: bool) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        trace!(alert_id = alert.pk, created, observers = observers.len(), "Notifying observers");
        for observer in observers {
            observer.alert_saved(alert, created);
        }
    }

    fn open_newest_first<P>(&self, predicate: P) -> Vec<Alert>
    where
        P: Fn(&Alert) -> bool,
    {
        let alerts = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        let mut open: Vec<Alert> = alerts
            .values()
            .filter(|alert| alert.active_state && predicate(alert))
            .cloned()
            .collect();
        open.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.pk.cmp(&a.pk)));
        open
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn active_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        let mut open = self.open_newest_first(|_| true);
        open.truncate(limit);
        Ok(open)
    }

    async fn open_alerts_matching(&self, criteria: &FilterCriteria) -> Result<Vec<Alert>> {
        Ok(self.open_newest_first(|alert| criteria.matches(alert)))
    }

    fn register_observer(&self, observer: Arc<dyn AlertObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }
}

#[derive(Default)]
struct Preferences {
    timezones: HashMap<UserId, FixedOffset>,
    time_slots: BTreeMap<u64, TimeSlot>,
    filters: BTreeMap<u64, AttributeFilter>,
    profiles: BTreeMap<u64, ProfileRecord>,
}

/// Users' time slots, filters and profiles kept in memory.
///
/// Writes enforce the invariants the management surface is responsible for:
/// names unique per owner, valid filter specs, matching ownership and one
/// profile per time slot.
pub struct InMemoryPreferenceStore {
    site_timezone: FixedOffset,
    inner: RwLock<Preferences>,
}

impl InMemoryPreferenceStore {
    pub fn new(site_timezone: FixedOffset) -> Self {
        Self {
            site_timezone,
            inner: RwLock::new(Preferences::default()),
        }
    }

    pub fn set_timezone(&self, owner: UserId, offset: FixedOffset) {
        self.write().timezones.insert(owner, offset);
    }

    pub fn save_time_slot(&self, slot: TimeSlot) -> Result<TimeSlot> {
        let mut inner = self.write();
        let clash = inner
            .time_slots
            .values()
            .any(|s| s.owner == slot.owner && s.name == slot.name && s.id != slot.id);
        if clash {
            return Err(Error::Conflict(format!(
                "time slot name '{}' already used by user {}",
                slot.name, slot.owner
            )));
        }
        inner.time_slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    /// Validates `spec` and stores the filter.
    pub fn save_filter(
        &self,
        id: u64,
        owner: UserId,
        name: &str,
        spec: &str,
    ) -> Result<AttributeFilter> {
        let filter = AttributeFilter::parse(id, owner, name, spec)?;
        let mut inner = self.write();
        let clash = inner
            .filters
            .values()
            .any(|f| f.owner == owner && f.name == name && f.id != id);
        if clash {
            return Err(Error::Conflict(format!(
                "filter name '{name}' already used by user {owner}"
            )));
        }
        inner.filters.insert(id, filter.clone());
        Ok(filter)
    }

    pub fn save_profile(&self, record: ProfileRecord) -> Result<ProfileRecord> {
        let mut inner = self.write();
        let slot = inner.time_slots.get(&record.time_slot).ok_or(Error::NotFound {
            kind: "time slot",
            id: record.time_slot,
        })?;
        if slot.owner != record.owner {
            return Err(Error::OwnershipViolation {
                kind: "time slot",
                id: slot.id,
                owner: record.owner,
            });
        }
        for filter_id in &record.filters {
            let filter = inner.filters.get(filter_id).ok_or(Error::NotFound {
                kind: "filter",
                id: *filter_id,
            })?;
            if filter.owner != record.owner {
                return Err(Error::OwnershipViolation {
                    kind: "filter",
                    id: filter.id,
                    owner: record.owner,
                });
            }
        }
        let slot_taken = inner
            .profiles
            .values()
            .any(|p| p.time_slot == record.time_slot && p.id != record.id);
        if slot_taken {
            return Err(Error::Conflict(format!(
                "time slot {} already backs a notification profile",
                record.time_slot
            )));
        }
        inner.profiles.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn filters(&self, owner: UserId) -> Vec<AttributeFilter> {
        self.read()
            .filters
            .values()
            .filter(|f| f.owner == owner)
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Preferences> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Preferences> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn assemble(&self, inner: &Preferences, record: &ProfileRecord) -> Result<NotificationProfile> {
        let time_slot = inner
            .time_slots
            .get(&record.time_slot)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "time slot",
                id: record.time_slot,
            })?;
        let filters = record
            .filters
            .iter()
            .map(|id| {
                inner
                    .filters
                    .get(id)
                    .cloned()
                    .ok_or(Error::NotFound { kind: "filter", id: *id })
            })
            .collect::<Result<Vec<_>>>()?;
        let timezone = inner
            .timezones
            .get(&record.owner)
            .copied()
            .unwrap_or(self.site_timezone);
        NotificationProfile::assemble(record.clone(), time_slot, filters, timezone)
    }
}

#[async_trait]
impl PreferenceStore for InMemoryPreferenceStore {
    async fn notification_profile(
        &self,
        owner: UserId,
        profile_id: u64,
    ) -> Result<NotificationProfile> {
        let inner = self.read();
        let record = inner
            .profiles
            .get(&profile_id)
            .filter(|p| p.owner == owner)
            .ok_or(Error::NotFound {
                kind: "notification profile",
                id: profile_id,
            })?;
        self.assemble(&inner, record)
    }
}
