//! The WebSocket listener.
//!
//! Accepts TCP connections, performs the upgrade handshake (path check and
//! authentication happen inside it) and runs one `ClientSession` task per
//! accepted client until shutdown.

use crate::auth::authenticate_request;
use crate::core::Authenticator;
use crate::registry::SessionId;
use crate::session::{ClientSession, SessionContext};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, instrument, trace, warn};

pub struct SessionServer {
    listener: TcpListener,
    ctx: SessionContext,
    authenticator: Arc<dyn Authenticator>,
    endpoint_path: Arc<str>,
    handshake_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionServer {
    /// Creates a server on an already-bound listener but does not run it.
    pub fn new(
        listener: TcpListener,
        ctx: SessionContext,
        authenticator: Arc<dyn Authenticator>,
        endpoint_path: &str,
        handshake_timeout: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listener,
            ctx,
            authenticator,
            endpoint_path: Arc::from(endpoint_path),
            handshake_timeout,
            shutdown_rx,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until shutdown, then waits for every session to
    /// finish.
    #[instrument(skip_all)]
    pub async fn run(mut self) {
        let mut sessions = JoinSet::new();
        let mut next_id = 0u64;
        info!(addr = ?self.listener.local_addr().ok(), path = %self.endpoint_path, "Session server listening");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => {
                    info!("Session server received shutdown signal.");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task panicked: {}", e);
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            next_id += 1;
                            let id = SessionId(next_id);
                            trace!(%peer, session_id = %id, "Accepted connection");
                            sessions.spawn(handle_connection(
                                stream,
                                peer,
                                id,
                                self.ctx.clone(),
                                self.authenticator.clone(),
                                self.endpoint_path.clone(),
                                self.handshake_timeout,
                                self.shutdown_rx.clone(),
                            ));
                        }
                        Err(e) => warn!("Failed to accept connection: {}", e),
                    }
                }
            }
        }

        debug!(remaining = sessions.len(), "Waiting for sessions to close");
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task panicked: {}", e);
            }
        }
        info!("Session server finished.");
    }
}

/// Why a handshake was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    WrongPath,
    Unauthorized,
}

fn error_response(status: StatusCode) -> ErrorResponse {
    let mut response = ErrorResponse::new(status.canonical_reason().map(str::to_string));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: SessionId,
    ctx: SessionContext,
    authenticator: Arc<dyn Authenticator>,
    endpoint_path: Arc<str>,
    handshake_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut session = ClientSession::new(id, ctx);
    let mut identity = None;
    let mut rejection = None;

    let callback = |request: &Request, response: Response| {
        if request.uri().path() != &*endpoint_path {
            rejection = Some(Rejection::WrongPath);
            return Err(error_response(StatusCode::NOT_FOUND));
        }
        match authenticate_request(authenticator.as_ref(), request) {
            Some(resolved) => {
                identity = Some(resolved);
                Ok(response)
            }
            None => {
                rejection = Some(Rejection::Unauthorized);
                Err(error_response(StatusCode::UNAUTHORIZED))
            }
        }
    };

    let handshake = tokio::select! {
        biased;
        _ = shutdown_rx.changed() => return,
        handshake = tokio::time::timeout(handshake_timeout, accept_hdr_async(stream, callback)) => match handshake {
            Ok(handshake) => handshake,
            Err(_) => {
                metrics::counter!("handshake_timeouts_total").increment(1);
                debug!(%peer, session_id = %id, "Handshake not completed in time");
                return;
            }
        },
    };

    match (handshake, rejection) {
        (Ok(ws), _) => {
            if session.open(identity).is_ok() {
                session.run(ws, shutdown_rx).await;
            }
        }
        (Err(_), Some(Rejection::Unauthorized)) => {
            let _ = session.open(None);
            debug!(%peer, session_id = %id, "Refused connection without valid credentials");
        }
        (Err(_), Some(Rejection::WrongPath)) => {
            debug!(%peer, session_id = %id, "Refused connection to unknown path");
        }
        (Err(e), None) => {
            debug!(%peer, session_id = %id, error = %e, "WebSocket handshake failed");
        }
    }
}
