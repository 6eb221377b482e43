//! Endpoint connection handles
//!
//! A [`PeerConnection`] is the mediator's view of one endpoint's live channel.
//! The transport owns the matching [`OutboundReceiver`] and writes whatever it
//! yields to the socket. Closing is one-shot: the first close wins and its
//! final error, if any, is the last thing the endpoint receives.

use seikan_proto::ServerMessage;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::MediatorError;
use crate::pending_acks::PendingAcks;

/// Identity of a connection in the registry side-table and in logs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a bounded wait produced no reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Disconnected,
}

/// What the transport should do next for a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Write this message
    Message(ServerMessage),
    /// Write the final message if present, then close the socket
    Close(Option<ServerMessage>),
}

/// Mediator-side handle to one endpoint
pub struct PeerConnection {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    shutdown: CancellationToken,
    final_message: Arc<Mutex<Option<ServerMessage>>>,
    acks: PendingAcks,
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PeerConnection {
    /// Create a connection whose outbound queue holds at most `capacity` messages
    pub fn channel(capacity: usize) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let final_message = Arc::new(Mutex::new(None));

        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            outbound: tx,
            shutdown: shutdown.clone(),
            final_message: final_message.clone(),
            acks: PendingAcks::new(),
        });

        let receiver = OutboundReceiver {
            rx,
            shutdown,
            final_message,
            draining: false,
        };

        (conn, receiver)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn acks(&self) -> &PendingAcks {
        &self.acks
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the connection has been closed by either side
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Queue a message, waiting for room if the endpoint is slow to read
    pub async fn send(&self, message: ServerMessage) -> Result<(), MediatorError> {
        if self.is_closed() {
            return Err(MediatorError::PeerDisconnected);
        }
        trace!(connection_id = %self.id, event = message.event(), "Queueing message");
        tokio::select! {
            result = self.outbound.send(message) => {
                result.map_err(|_| MediatorError::PeerDisconnected)
            }
            _ = self.shutdown.cancelled() => Err(MediatorError::PeerDisconnected),
        }
    }

    /// Ask the endpoint something and wait up to `limit` for its `ack`
    ///
    /// `build` receives the ack id to embed in the request.
    pub async fn request<F>(&self, build: F, limit: Duration) -> Result<Value, WaitError>
    where
        F: FnOnce(u64) -> ServerMessage,
    {
        let (ack_id, reply) = self.acks.register();

        let exchange = async {
            self.send(build(ack_id))
                .await
                .map_err(|_| WaitError::Disconnected)?;
            reply.await.map_err(|_| WaitError::Disconnected)
        };

        let outcome = tokio::select! {
            result = tokio::time::timeout(limit, exchange) => {
                result.unwrap_or(Err(WaitError::TimedOut))
            }
            _ = self.shutdown.cancelled() => Err(WaitError::Disconnected),
        };

        if outcome.is_err() {
            self.acks.cancel(ack_id);
            debug!(connection_id = %self.id, ack_id, ?outcome, "Bounded wait ended without reply");
        }
        outcome
    }

    /// Close after delivering `message` as an `error` event
    ///
    /// Returns false if the connection was already closed, in which case
    /// nothing is sent.
    pub fn close_with_error(&self, message: impl Into<String>) -> bool {
        self.close_with(Some(ServerMessage::error(message)))
    }

    /// Close without a final message
    pub fn close(&self) -> bool {
        self.close_with(None)
    }

    fn close_with(&self, last: Option<ServerMessage>) -> bool {
        let mut slot = self
            .final_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            return false;
        }
        *slot = last;
        self.shutdown.cancel();
        drop(slot);

        self.acks.cancel_all();
        debug!(connection_id = %self.id, "Connection closed by mediator");
        true
    }
}

/// Transport-side end of a connection's outbound queue
pub struct OutboundReceiver {
    rx: mpsc::Receiver<ServerMessage>,
    shutdown: CancellationToken,
    final_message: Arc<Mutex<Option<ServerMessage>>>,
    /// Set once closed; the queue then only empties
    draining: bool,
}

impl OutboundReceiver {
    /// Next thing to write
    ///
    /// After the connection is closed, messages already queued are still
    /// yielded in order, then `Close` with the final message. Every further
    /// call yields `Close(None)`.
    pub async fn recv(&mut self) -> Outgoing {
        if !self.draining {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {}
                message = self.rx.recv() => {
                    if let Some(message) = message {
                        return Outgoing::Message(message);
                    }
                }
            }
            self.start_draining();
        }
        self.next_queued()
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is pending
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        if !self.draining && self.shutdown.is_cancelled() {
            self.start_draining();
        }
        if self.draining {
            return Some(self.next_queued());
        }
        self.rx.try_recv().ok().map(Outgoing::Message)
    }

    fn start_draining(&mut self) {
        self.draining = true;
        // Senders racing the close fail from here on
        self.rx.close();
    }

    fn next_queued(&mut self) -> Outgoing {
        match self.rx.try_recv() {
            Ok(message) => Outgoing::Message(message),
            Err(_) => Outgoing::Close(self.take_final()),
        }
    }

    fn take_final(&self) -> Option<ServerMessage> {
        self.final_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}
