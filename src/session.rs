//! One client connection: authorization, inbound commands and outbound
//! events.
//!
//! A session starts `Connecting`. The handshake hands it the identity the
//! transport resolved; with one it becomes `Open`, without one it goes
//! straight to `Closed`. While open it answers commands and forwards topic
//! events from its own bounded queue, so a slow client only ever holds up
//! itself.

use crate::core::{AlertStore, Identity, PreferenceStore};
use crate::error::{Error, ProtocolErrorKind, Result};
use crate::filter::FilterCriteria;
use crate::profile;
use crate::protocol::{ClientCommand, ServerMessage};
use crate::registry::{SessionHandle, SessionId, SubscriptionRegistry, Topic};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// A bidirectional message transport, abstracted so sessions can be driven
/// without a socket in tests.
#[async_trait]
pub trait SessionTransport: Send {
    /// Reads the next message
    ///
    /// # Returns
    /// * `Some(Ok(Message))` if a message was successfully received
    /// * `Some(Err(error))` if there was an error reading the message
    /// * `None` if the connection has been closed
    async fn read_message(&mut self) -> Option<Result<Message, WsError>>;

    /// Writes one message to the peer.
    async fn write_message(&mut self, message: Message) -> Result<(), WsError>;
}

#[async_trait]
impl<S> SessionTransport for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_message(&mut self) -> Option<Result<Message, WsError>> {
        futures_util::StreamExt::next(self).await
    }

    async fn write_message(&mut self, message: Message) -> Result<(), WsError> {
        futures_util::SinkExt::send(self, message).await
    }
}

/// Shared services every session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<SubscriptionRegistry>,
    pub alerts: Arc<dyn AlertStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    /// Maximum number of alerts in a `list`/`subscribe` snapshot.
    pub snapshot_limit: usize,
    /// Capacity of each session's outbound event queue.
    pub outbound_capacity: usize,
    /// Longest a single frame write may block before the session is closed.
    pub write_timeout: Duration,
}

pub struct ClientSession {
    id: SessionId,
    state: SessionState,
    identity: Option<Identity>,
    ctx: SessionContext,
    /// Present once the session has subscribed to a topic.
    events: Option<mpsc::Receiver<Arc<ServerMessage>>>,
}

impl ClientSession {
    pub fn new(id: SessionId, ctx: SessionContext) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            identity: None,
            ctx,
            events: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Completes the handshake with whatever identity the transport resolved.
    pub fn open(&mut self, identity: Option<Identity>) -> Result<()> {
        if self.state != SessionState::Connecting {
            return Err(Error::ProtocolError(ProtocolErrorKind::MalformedMessage));
        }
        match identity {
            Some(identity) => {
                info!(session_id = %self.id, user_id = identity.user_id, "Session opened");
                metrics::counter!("sessions_opened_total").increment(1);
                metrics::gauge!("sessions_active").increment(1.0);
                self.identity = Some(identity);
                self.state = SessionState::Open;
                Ok(())
            }
            None => {
                info!(session_id = %self.id, "Rejecting unauthenticated connection");
                metrics::counter!("sessions_rejected_total").increment(1);
                self.state = SessionState::Closed;
                Err(Error::Unauthorized)
            }
        }
    }

    /// Executes one command and returns its reply.
    pub async fn handle_command(&mut self, command: ClientCommand) -> Result<ServerMessage> {
        let identity = match (&self.state, &self.identity) {
            (SessionState::Open, Some(identity)) => identity.clone(),
            _ => return Err(Error::Unauthorized),
        };

        match command {
            ClientCommand::List => Ok(ServerMessage::Incidents {
                incidents: self.snapshot().await?,
            }),
            ClientCommand::Subscribe => {
                // Join before reading the snapshot so nothing falls in between.
                self.subscribe(&Topic::active_incidents());
                Ok(ServerMessage::Subscribed {
                    channel_name: self.id.to_string(),
                    start_incidents: self.snapshot().await?,
                })
            }
            ClientCommand::ProfileIncidents { profile } => {
                let profile = self
                    .ctx
                    .preferences
                    .notification_profile(identity.user_id, profile)
                    .await?;
                let incidents = profile.current_matches(self.ctx.alerts.as_ref()).await?;
                Ok(ServerMessage::ProfileIncidents {
                    profile: profile.id,
                    incidents,
                })
            }
            ClientCommand::PreviewFilter { filter } => {
                let criteria = FilterCriteria::from_value(filter)?;
                let incidents = profile::preview(self.ctx.alerts.as_ref(), &criteria).await?;
                Ok(ServerMessage::FilterPreview { incidents })
            }
        }
    }

    /// Decodes and executes a text frame; failures become error replies.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        let result = match ClientCommand::parse(text) {
            Ok(command) => {
                debug!(session_id = %self.id, ?command, "Received command");
                self.handle_command(command).await
            }
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            match &e {
                Error::ProtocolError(_) => {
                    metrics::counter!("protocol_errors_total").increment(1);
                    debug!(session_id = %self.id, error = %e, "Protocol error");
                }
                Error::Store(_) => error!(session_id = %self.id, error = %e, "Store failure"),
                _ => debug!(session_id = %self.id, error = %e, "Command failed"),
            }
            ServerMessage::error(&e)
        })
    }

    fn subscribe(&mut self, topic: &Topic) {
        if self.events.is_some() && self.ctx.registry.is_member(topic, self.id) {
            return;
        }
        // Only the registry holds senders; eviction closes our queue.
        let (tx, rx) = mpsc::channel(self.ctx.outbound_capacity.max(1));
        self.ctx.registry.join(topic, SessionHandle::new(self.id, tx));
        self.events = Some(rx);
    }

    async fn snapshot(&self) -> Result<Vec<crate::core::Alert>> {
        let start = Instant::now();
        let alerts = self.ctx.alerts.active_alerts(self.ctx.snapshot_limit).await?;
        metrics::histogram!("snapshot_duration_seconds").record(start.elapsed().as_secs_f64());
        Ok(alerts)
    }

    /// Leaves every topic and marks the session closed.
    pub fn close(&mut self) {
        if self.state == SessionState::Open {
            metrics::gauge!("sessions_active").decrement(1.0);
        }
        self.ctx.registry.leave_all(self.id);
        self.events = None;
        if self.state != SessionState::Closed {
            info!(session_id = %self.id, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Serves the connection until the peer leaves, the transport fails, the
    /// session is evicted or shutdown is signalled.
    ///
    /// Every write races the shutdown signal and the write timeout, so a
    /// client that stops reading cannot keep the session alive.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn run<T: SessionTransport>(
        mut self,
        mut transport: T,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        if self.state != SessionState::Open {
            self.close();
            return;
        }
        let write_timeout = self.ctx.write_timeout;

        loop {
            let outbound = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    debug!("Session received shutdown signal");
                    break;
                }
                event = next_event(&mut self.events) => match event {
                    Some(event) => Outbound::Event(event),
                    None => {
                        info!("Session evicted from its topics");
                        break;
                    }
                },
                inbound = transport.read_message() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        // A command still reading the store when shutdown
                        // arrives is abandoned without a reply.
                        tokio::select! {
                            biased;
                            _ = shutdown_rx.changed() => break,
                            reply = self.handle_text(text.as_str()) => Outbound::Reply(reply),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => Outbound::Reply(ServerMessage::error(
                        &Error::ProtocolError(ProtocolErrorKind::MalformedMessage),
                    )),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client closed the connection");
                        break;
                    }
                    // Ping/pong are answered by the websocket layer.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport error");
                        break;
                    }
                },
            };

            let message = match &outbound {
                Outbound::Event(event) => event.as_ref(),
                Outbound::Reply(reply) => reply,
            };
            if !deliver(&mut transport, message, write_timeout, &mut shutdown_rx).await {
                break;
            }
        }

        self.close();
    }
}

/// A frame waiting to be written.
enum Outbound {
    Event(Arc<ServerMessage>),
    Reply(ServerMessage),
}

/// Writes one frame. Returns `false` when the session should close instead.
async fn deliver<T: SessionTransport>(
    transport: &mut T,
    message: &ServerMessage,
    write_timeout: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.changed() => {
            debug!("Shutdown signalled during a write");
            false
        }
        written = tokio::time::timeout(write_timeout, write(transport, message)) => match written {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to write to client, closing session");
                false
            }
            Err(_) => {
                warn!(timeout = ?write_timeout, "Client stopped reading, closing session");
                metrics::counter!("session_write_timeouts_total").increment(1);
                false
            }
        },
    }
}

async fn next_event(
    events: &mut Option<mpsc::Receiver<Arc<ServerMessage>>>,
) -> Option<Arc<ServerMessage>> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write<T: SessionTransport>(transport: &mut T, message: &ServerMessage) -> Result<(), WsError> {
    match message.to_json() {
        Ok(json) => transport.write_message(Message::text(json)).await,
        Err(e) => {
            // Alerts always serialize; this is an invariant violation.
            error!(error = %e, "Failed to serialize outbound message");
            debug_assert!(false, "outbound message failed to serialize: {e}");
            Ok(())
        }
    }
}
