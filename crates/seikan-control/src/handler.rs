//! Mediator message handler
//!
//! Entry point for the transport: every decoded client message, undecodable
//! frame and disconnect of a connection goes through [`TunnelHandler`]. All
//! tunnel-fatal conditions end in a single teardown path that releases the
//! registry entry once and notifies each still-connected side exactly once.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use seikan_proto::{ClientMessage, ServerMessage};

use crate::config::MediatorConfig;
use crate::connection::{OutboundReceiver, PeerConnection};
use crate::error::MediatorError;
use crate::handshake::{HandshakeFailure, HandshakeOrchestrator};
use crate::registry::{
    AcceptOutcome, PairedTunnel, RegistryStats, RelayRefusal, ReleasedTunnel, Role,
    TunnelRegistry,
};
use crate::task_tracker::TaskTracker;
use crate::tunnel_id::TunnelIdGenerator;

/// Sent to the innocent side when its peer broke the protocol
const PEER_VIOLATION_MESSAGE: &str = "The other side sent an invalid message.";

/// Sent to a connection that relays data without belonging to a tunnel
const NOT_ATTACHED_MESSAGE: &str = "Not connected to any tunnel";

/// Why a tunnel is being torn down
#[derive(Debug)]
enum Teardown {
    /// `side` went away
    PeerDisconnected { side: Role },
    /// The key exchange failed; both sides get the error
    HandshakeFailed(MediatorError),
    /// `side` sent something it must not have
    ProtocolViolation { side: Role, error: MediatorError },
}

impl Teardown {
    fn label(&self) -> &'static str {
        match self {
            Teardown::PeerDisconnected { .. } => "peer disconnected",
            Teardown::HandshakeFailed(_) => "handshake failed",
            Teardown::ProtocolViolation { .. } => "protocol violation",
        }
    }
}

/// Handles connections for the mediator
#[derive(Clone)]
pub struct TunnelHandler {
    registry: Arc<TunnelRegistry>,
    orchestrator: Arc<HandshakeOrchestrator>,
    /// Tracks handshake tasks to abort them on teardown
    task_tracker: Arc<TaskTracker>,
    config: MediatorConfig,
}

impl TunnelHandler {
    pub fn new(config: MediatorConfig) -> Self {
        let registry = Arc::new(TunnelRegistry::new(config.max_id_attempts));
        Self::with_registry(registry, config)
    }

    /// Use a custom tunnel id source
    pub fn with_id_generator(config: MediatorConfig, generator: Arc<dyn TunnelIdGenerator>) -> Self {
        let registry = Arc::new(TunnelRegistry::with_generator(
            generator,
            config.max_id_attempts,
        ));
        Self::with_registry(registry, config)
    }

    fn with_registry(registry: Arc<TunnelRegistry>, config: MediatorConfig) -> Self {
        let orchestrator = Arc::new(HandshakeOrchestrator::new(
            registry.clone(),
            config.public_key_timeout,
            config.identifier_timeout,
        ));
        Self {
            registry,
            orchestrator,
            task_tracker: Arc::new(TaskTracker::new()),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Allocate the mediator side of a new endpoint connection
    pub fn open_connection(&self) -> (Arc<PeerConnection>, OutboundReceiver) {
        let (conn, outbound) = PeerConnection::channel(self.config.outbound_capacity);
        debug!(connection_id = %conn.id(), "New connection");
        (conn, outbound)
    }

    /// Handle one decoded message from `conn`
    pub async fn handle_message(&self, conn: &Arc<PeerConnection>, message: ClientMessage) {
        if conn.is_closed() {
            debug!(
                connection_id = %conn.id(),
                event = message.event(),
                "Dropping message from closed connection"
            );
            return;
        }

        match message {
            ClientMessage::New => self.handle_new(conn).await,
            ClientMessage::Join { tunnel_id } => self.handle_join(conn, &tunnel_id),
            ClientMessage::Accept => self.handle_accept(conn).await,
            ClientMessage::Data { chunk } => self.handle_data(conn, chunk).await,
            ClientMessage::Ack { id, payload } => {
                if !conn.acks().resolve(id, payload) {
                    debug!(connection_id = %conn.id(), ack_id = id, "Ignoring stale ack");
                }
            }
        }
    }

    /// A frame from `conn` could not be decoded
    pub fn handle_invalid_frame(&self, conn: &Arc<PeerConnection>, reason: impl Into<String>) {
        self.reject(conn, MediatorError::violation(reason));
    }

    /// The transport lost `conn`, for any reason
    pub fn handle_disconnect(&self, conn: &Arc<PeerConnection>) {
        conn.close();
        match self.registry.release_connection(conn.id()) {
            Some((role, released)) => {
                self.finish(released, Teardown::PeerDisconnected { side: role })
            }
            None => debug!(connection_id = %conn.id(), "Unattached connection closed"),
        }
    }

    async fn handle_new(&self, conn: &Arc<PeerConnection>) {
        match self.registry.create_tunnel(conn.clone()) {
            Ok(id) => {
                info!(
                    tunnel_id = %id,
                    connection_id = %conn.id(),
                    waiting = self.registry.stats().waiting,
                    "New tunnel created"
                );
                let announce = ServerMessage::TunnelId {
                    tunnel_id: id.to_string(),
                };
                if conn.send(announce).await.is_err() {
                    debug!(tunnel_id = %id, "Initiator left before receiving its tunnel id");
                }
            }
            Err(error) if error.is_tunnel_fatal() => self.reject(conn, error),
            Err(error) => {
                warn!(connection_id = %conn.id(), %error, "Could not create tunnel");
                conn.close_with_error(error.to_string());
            }
        }
    }

    fn handle_join(&self, conn: &Arc<PeerConnection>, raw_id: &str) {
        match self.registry.join_tunnel(raw_id, conn.clone()) {
            Ok(tunnel) => {
                info!(
                    tunnel_id = %tunnel.id,
                    initiator = %tunnel.initiator.id(),
                    joiner = %tunnel.joiner.id(),
                    "Tunnel joined, starting handshake"
                );
                self.spawn_handshake(tunnel);
            }
            Err(error) if error.is_tunnel_fatal() => self.reject(conn, error),
            Err(error) => {
                info!(connection_id = %conn.id(), requested = %raw_id, %error, "Join rejected");
                conn.close_with_error(error.to_string());
            }
        }
    }

    fn spawn_handshake(&self, tunnel: PairedTunnel) {
        let serial = tunnel.serial;
        let handler = self.clone();
        let (start_tx, start_rx) = oneshot::channel::<()>();

        // Held at the gate until tracked, so teardown can always abort it
        let handle = tokio::spawn(async move {
            if start_rx.await.is_ok() {
                handler.run_handshake(tunnel).await;
            }
            handler.task_tracker.finished(serial);
        });
        self.task_tracker.track(serial, &handle);
        let _ = start_tx.send(());
    }

    async fn run_handshake(&self, tunnel: PairedTunnel) {
        let id = tunnel.id.clone();

        match self.orchestrator.run(&tunnel).await {
            Ok(()) => match self.registry.complete_handshake(&tunnel) {
                Ok(Some(paired)) => self.announce_connected(&paired).await,
                Ok(None) => info!(tunnel_id = %id, "Handshake forwarded, awaiting accept"),
                Err(_) => debug!(tunnel_id = %id, "Tunnel closed as the handshake completed"),
            },
            Err(HandshakeFailure {
                error: MediatorError::TunnelClosed,
                ..
            }) => {
                debug!(tunnel_id = %id, "Tunnel closed during handshake");
            }
            Err(HandshakeFailure {
                party,
                error: MediatorError::PeerDisconnected,
            }) => {
                self.teardown(&tunnel, Teardown::PeerDisconnected { side: party });
            }
            Err(HandshakeFailure { party, error }) => {
                warn!(tunnel_id = %id, role = %party, %error, "Handshake failed");
                self.teardown(&tunnel, Teardown::HandshakeFailed(error));
            }
        }
    }

    async fn handle_accept(&self, conn: &Arc<PeerConnection>) {
        match self.registry.accept(conn.id()) {
            AcceptOutcome::Opened(paired) => self.announce_connected(&paired).await,
            AcceptOutcome::Recorded => {
                debug!(connection_id = %conn.id(), "Accept recorded, waiting for the other side")
            }
            AcceptOutcome::Ignored => {
                debug!(connection_id = %conn.id(), "Ignoring accept")
            }
        }
    }

    async fn announce_connected(&self, paired: &PairedTunnel) {
        info!(tunnel_id = %paired.id, "Tunnel connected");
        let _ = tokio::join!(
            paired.initiator.send(ServerMessage::Connected),
            paired.joiner.send(ServerMessage::Connected),
        );
    }

    async fn handle_data(&self, conn: &Arc<PeerConnection>, chunk: Option<Vec<u8>>) {
        let target = match self.registry.relay_target(conn.id()) {
            Ok(target) => target,
            Err(RelayRefusal::NotAttached) => {
                warn!(connection_id = %conn.id(), "Data from a connection without a tunnel");
                conn.close_with_error(NOT_ATTACHED_MESSAGE);
                return;
            }
            Err(RelayRefusal::NotConnected) => {
                self.reject(
                    conn,
                    MediatorError::violation("Received data before the tunnel was connected"),
                );
                return;
            }
        };

        let Some(chunk) = chunk else {
            self.reject(
                conn,
                MediatorError::violation("Malformed request, missing \"chunk\""),
            );
            return;
        };

        trace!(
            from = %conn.id(),
            to = %target.id(),
            bytes = chunk.len(),
            "Relaying chunk"
        );
        if target.send(ServerMessage::Data { chunk }).await.is_err() {
            debug!(connection_id = %target.id(), "Relay target gone, dropping chunk");
        }
    }

    /// Fail `conn` with `error`, tearing down its tunnel if it has one
    fn reject(&self, conn: &Arc<PeerConnection>, error: MediatorError) {
        warn!(connection_id = %conn.id(), %error, "Rejecting connection");
        match self.registry.release_connection(conn.id()) {
            Some((side, released)) => {
                self.finish(released, Teardown::ProtocolViolation { side, error })
            }
            None => {
                conn.close_with_error(error.to_string());
            }
        }
    }

    fn teardown(&self, tunnel: &PairedTunnel, reason: Teardown) {
        match self.registry.release_paired(tunnel) {
            Some(released) => self.finish(released, reason),
            None => debug!(
                tunnel_id = %tunnel.id,
                reason = reason.label(),
                "Tunnel already released"
            ),
        }
    }

    fn finish(&self, released: ReleasedTunnel, reason: Teardown) {
        self.task_tracker.abort(released.serial);

        let label = reason.label();
        match reason {
            Teardown::PeerDisconnected { side } => {
                if let Some(gone) = released.peer(side) {
                    gone.close();
                }
                if let Some(survivor) = released.peer(side.other()) {
                    survivor.close_with_error(MediatorError::PeerDisconnected.to_string());
                }
            }
            Teardown::HandshakeFailed(error) => {
                let message = error.to_string();
                released.initiator.close_with_error(message.clone());
                if let Some(joiner) = &released.joiner {
                    joiner.close_with_error(message);
                }
            }
            Teardown::ProtocolViolation { side, error } => {
                if let Some(offender) = released.peer(side) {
                    offender.close_with_error(error.to_string());
                }
                if let Some(other) = released.peer(side.other()) {
                    other.close_with_error(PEER_VIOLATION_MESSAGE);
                }
            }
        }

        info!(
            tunnel_id = %released.id,
            previous_state = ?released.previous_state,
            lifetime = ?released.lifetime,
            reason = label,
            live_tunnels = self.registry.len(),
            "Tunnel torn down"
        );
    }
}

impl Default for TunnelHandler {
    fn default() -> Self {
        Self::new(MediatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outgoing;
    use crate::tunnel_id::TunnelId;
    use serde_json::json;
    use std::time::Duration;

    async fn joined(
        handler: &TunnelHandler,
    ) -> (Arc<PeerConnection>, OutboundReceiver, Arc<PeerConnection>, OutboundReceiver) {
        let (a, mut a_rx) = handler.open_connection();
        let (b, b_rx) = handler.open_connection();
        handler.handle_message(&a, ClientMessage::New).await;
        let tunnel_id = match a_rx.recv().await {
            Outgoing::Message(ServerMessage::TunnelId { tunnel_id }) => tunnel_id,
            other => panic!("Expected tunnel-id, got {:?}", other),
        };
        handler
            .handle_message(&b, ClientMessage::Join { tunnel_id })
            .await;
        (a, a_rx, b, b_rx)
    }

    #[tokio::test]
    async fn test_new_announces_tunnel_id() {
        let handler = TunnelHandler::default();
        let (conn, mut rx) = handler.open_connection();

        handler.handle_message(&conn, ClientMessage::New).await;

        match rx.recv().await {
            Outgoing::Message(ServerMessage::TunnelId { tunnel_id }) => {
                assert!(TunnelId::parse(&tunnel_id).is_some());
            }
            other => panic!("Expected tunnel-id, got {:?}", other),
        }
        assert_eq!(handler.stats(), RegistryStats { waiting: 1, active: 0 });
    }

    #[tokio::test]
    async fn test_disconnect_of_waiting_initiator_frees_tunnel() {
        let handler = TunnelHandler::default();
        let (conn, _rx) = handler.open_connection();

        handler.handle_message(&conn, ClientMessage::New).await;
        handler.handle_disconnect(&conn);

        assert!(handler.registry().is_empty());
        assert_eq!(handler.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_frame_from_unattached_connection() {
        let handler = TunnelHandler::default();
        let (conn, mut rx) = handler.open_connection();

        handler.handle_invalid_frame(&conn, "Malformed request");

        assert_eq!(
            rx.recv().await,
            Outgoing::Close(Some(ServerMessage::error("Malformed request")))
        );
    }

    #[tokio::test]
    async fn test_messages_after_close_are_dropped() {
        let handler = TunnelHandler::default();
        let (conn, _rx) = handler.open_connection();
        conn.close();

        handler.handle_message(&conn, ClientMessage::New).await;
        assert!(handler.registry().is_empty());
    }

    #[tokio::test]
    async fn test_handshake_task_untracked_once_forwarded() {
        let handler = TunnelHandler::default();
        let (a, mut a_rx, b, mut b_rx) = joined(&handler).await;
        assert_eq!(handler.task_tracker.len(), 1);

        let ack = match a_rx.recv().await {
            Outgoing::Message(ServerMessage::RequestPublicKey { ack }) => ack,
            other => panic!("Expected request-public-key, got {:?}", other),
        };
        handler
            .handle_message(&a, ClientMessage::Ack { id: ack, payload: json!({"publicKey": "k"}) })
            .await;
        let ack = match b_rx.recv().await {
            Outgoing::Message(ServerMessage::PublicKey { ack, .. }) => ack,
            other => panic!("Expected public-key, got {:?}", other),
        };
        handler
            .handle_message(&b, ClientMessage::Ack { id: ack, payload: json!({"identifier": "i"}) })
            .await;
        assert!(matches!(
            a_rx.recv().await,
            Outgoing::Message(ServerMessage::BIdentifier { .. })
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while !handler.task_tracker.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handshake task still tracked");
    }

    #[tokio::test]
    async fn test_teardown_aborts_pending_handshake() {
        let handler = TunnelHandler::default();
        let (_a, _a_rx, b, _b_rx) = joined(&handler).await;
        assert_eq!(handler.task_tracker.len(), 1);

        handler.handle_disconnect(&b);

        assert!(handler.task_tracker.is_empty());
        assert!(handler.registry().is_empty());
    }
}
