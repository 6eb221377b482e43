//! Handshake orchestration
//!
//! Runs the three strictly ordered steps of a tunnel's key exchange:
//!
//! 1. ask A for its public key (long wait, may need a human)
//! 2. hand the key to B and wait for B's encrypted identifier (short wait)
//! 3. forward the encrypted identifier to A
//!
//! Blobs are opaque; only their presence is checked. After every wait the
//! tunnel must still be handshaking, otherwise the orchestrator stops without
//! touching either connection.

use seikan_proto::{IdentifierReply, PublicKeyReply, ServerMessage};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::connection::WaitError;
use crate::error::{HandshakeStep, MediatorError};
use crate::registry::{PairedTunnel, Role, TunnelRegistry};

/// A failed handshake and the side it is attributed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
    pub party: Role,
    pub error: MediatorError,
}

impl HandshakeFailure {
    fn new(party: Role, error: MediatorError) -> Self {
        Self { party, error }
    }

    fn from_wait(party: Role, step: HandshakeStep, error: WaitError) -> Self {
        let error = match error {
            WaitError::TimedOut => MediatorError::HandshakeTimeout { step },
            WaitError::Disconnected => MediatorError::PeerDisconnected,
        };
        Self::new(party, error)
    }
}

pub struct HandshakeOrchestrator {
    registry: Arc<TunnelRegistry>,
    public_key_timeout: Duration,
    identifier_timeout: Duration,
}

impl HandshakeOrchestrator {
    pub fn new(
        registry: Arc<TunnelRegistry>,
        public_key_timeout: Duration,
        identifier_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            public_key_timeout,
            identifier_timeout,
        }
    }

    /// Drive the exchange for a freshly joined tunnel
    pub async fn run(&self, tunnel: &PairedTunnel) -> Result<(), HandshakeFailure> {
        let reply = tunnel
            .initiator
            .request(
                |ack| ServerMessage::RequestPublicKey { ack },
                self.public_key_timeout,
            )
            .await
            .map_err(|e| HandshakeFailure::from_wait(Role::A, HandshakeStep::PublicKey, e))?;
        self.ensure_live(tunnel)?;

        let public_key = required_field::<PublicKeyReply, _>(reply, |r| r.public_key)
            .ok_or_else(|| {
                HandshakeFailure::new(
                    Role::A,
                    MediatorError::MalformedHandshakeResponse {
                        step: HandshakeStep::PublicKey,
                    },
                )
            })?;
        debug!(tunnel_id = %tunnel.id, "Received initiator public key");

        let reply = tunnel
            .joiner
            .request(
                |ack| ServerMessage::PublicKey { ack, public_key },
                self.identifier_timeout,
            )
            .await
            .map_err(|e| HandshakeFailure::from_wait(Role::B, HandshakeStep::Identifier, e))?;
        self.ensure_live(tunnel)?;

        let identifier = required_field::<IdentifierReply, _>(reply, |r| r.identifier)
            .ok_or_else(|| {
                HandshakeFailure::new(
                    Role::B,
                    MediatorError::MalformedHandshakeResponse {
                        step: HandshakeStep::Identifier,
                    },
                )
            })?;
        debug!(tunnel_id = %tunnel.id, "Received joiner identifier");

        tunnel
            .initiator
            .send(ServerMessage::BIdentifier { identifier })
            .await
            .map_err(|e| HandshakeFailure::new(Role::A, e))?;

        Ok(())
    }

    fn ensure_live(&self, tunnel: &PairedTunnel) -> Result<(), HandshakeFailure> {
        if self.registry.is_handshaking(tunnel) {
            Ok(())
        } else {
            Err(HandshakeFailure::new(Role::A, MediatorError::TunnelClosed))
        }
    }
}

/// Extract a non-null field from an ack payload
fn required_field<T, F>(payload: Value, field: F) -> Option<Value>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> Value,
{
    let parsed: T = serde_json::from_value(payload).ok()?;
    let value = field(parsed);
    (!value.is_null()).then_some(value)
}
