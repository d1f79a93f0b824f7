//! Turns committed alert writes into events on the active-incidents topic.
//!
//! Every subscriber of the topic receives every event; scoping to a profile
//! is done on the pull side (`profile_incidents`), not here.

use crate::core::{Alert, AlertObserver};
use crate::protocol::{EventKind, ServerMessage};
use crate::registry::{PublishReport, SubscriptionRegistry, Topic};
use std::sync::Arc;
use tracing::debug;

pub struct BroadcastDispatcher {
    registry: Arc<SubscriptionRegistry>,
    topic: Topic,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            topic: Topic::active_incidents(),
        }
    }

    /// Publishes one `created`/`modified` event for `alert`.
    pub fn dispatch(&self, alert: &Alert, created: bool) -> PublishReport {
        let kind = if created {
            EventKind::Created
        } else {
            EventKind::Modified
        };
        let event = Arc::new(ServerMessage::event(kind, alert.clone()));
        let report = self.registry.publish(&self.topic, event);
        metrics::counter!("events_published_total").increment(1);
        debug!(
            alert_id = alert.pk,
            ?kind,
            delivered = report.delivered,
            evicted = report.evicted,
            "Dispatched alert event"
        );
        report
    }
}

impl AlertObserver for BroadcastDispatcher {
    fn alert_saved(&self, alert: &Alert, created: bool) {
        self.dispatch(alert, created);
    }
}
