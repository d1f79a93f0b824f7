//! Topic membership for connected sessions.
//!
//! The registry maps topic names to the outbound queues of the sessions that
//! joined them. Publishing never waits on a session: each delivery is a
//! non-blocking `try_send`, and a session whose queue is full or gone is
//! evicted from every topic.

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

/// Identifies one live session for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A named broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The topic every alert create/modify is published to.
    pub fn active_incidents() -> Self {
        Self::new("subscribed_active_incidents")
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The registry's handle on a session's outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    outbound: mpsc::Sender<Arc<ServerMessage>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, outbound: mpsc::Sender<Arc<ServerMessage>>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }
}

/// What a single `publish` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
}

/// Process-wide topic → sessions mapping.
///
/// Cheap to share behind an `Arc`; independent instances do not interact.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: Mutex<HashMap<Topic, HashMap<SessionId, SessionHandle>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` to `topic`. Joining twice is a no-op.
    pub fn join(&self, topic: &Topic, session: SessionHandle) {
        let mut topics = self.lock();
        let members = topics.entry(topic.clone()).or_default();
        let id = session.id;
        if members.insert(id, session).is_none() {
            metrics::gauge!("topic_members", "topic" => topic.name().to_string()).increment(1.0);
            debug!(%topic, session_id = %id, members = members.len(), "Session joined topic");
        }
    }

    /// Removes `session` from `topic`. Leaving a topic you are not in is fine.
    pub fn leave(&self, topic: &Topic, session: SessionId) {
        let mut topics = self.lock();
        Self::remove_member(&mut topics, topic, session);
    }

    /// Removes `session` from every topic it joined.
    pub fn leave_all(&self, session: SessionId) {
        let mut topics = self.lock();
        Self::remove_everywhere(&mut topics, session);
    }

    /// Whether `session` is currently a member of `topic`.
    pub fn is_member(&self, topic: &Topic, session: SessionId) -> bool {
        self.lock()
            .get(topic)
            .is_some_and(|members| members.contains_key(&session))
    }

    pub fn member_count(&self, topic: &Topic) -> usize {
        self.lock().get(topic).map_or(0, HashMap::len)
    }

    /// Delivers `message` to every session joined to `topic` right now.
    ///
    /// Deliveries happen while the membership lock is held, so two publishes
    /// reach every session in the order they were made. Sessions whose queue
    /// is closed or full are evicted from all topics.
    pub fn publish(&self, topic: &Topic, message: Arc<ServerMessage>) -> PublishReport {
        let mut topics = self.lock();
        let mut report = PublishReport::default();
        let mut failed = Vec::new();

        if let Some(members) = topics.get(topic) {
            for handle in members.values() {
                match handle.outbound.try_send(message.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(%topic, session_id = %handle.id, "Session outbound queue full, evicting");
                        failed.push(handle.id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(%topic, session_id = %handle.id, "Session gone, evicting");
                        failed.push(handle.id);
                    }
                }
            }
        }

        for session in failed {
            Self::remove_everywhere(&mut topics, session);
            report.evicted += 1;
        }

        metrics::counter!("event_deliveries_total").increment(report.delivered as u64);
        metrics::counter!("session_evictions_total").increment(report.evicted as u64);
        trace!(%topic, delivered = report.delivered, evicted = report.evicted, "Published");
        report
    }

    fn remove_everywhere(
        topics: &mut HashMap<Topic, HashMap<SessionId, SessionHandle>>,
        session: SessionId,
    ) {
        let joined: Vec<Topic> = topics
            .iter()
            .filter(|(_, members)| members.contains_key(&session))
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in joined {
            Self::remove_member(topics, &topic, session);
        }
    }

    fn remove_member(
        topics: &mut HashMap<Topic, HashMap<SessionId, SessionHandle>>,
        topic: &Topic,
        session: SessionId,
    ) {
        let Some(members) = topics.get_mut(topic) else {
            return;
        };
        if members.remove(&session).is_some() {
            metrics::gauge!("topic_members", "topic" => topic.name().to_string()).decrement(1.0);
            debug!(%topic, session_id = %session, "Session left topic");
        }
        if members.is_empty() {
            topics.remove(topic);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Topic, HashMap<SessionId, SessionHandle>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
