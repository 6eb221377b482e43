//! Mediator error taxonomy
//!
//! The `Display` text of each variant is what peers receive in `error{message}`.

use std::fmt;
use thiserror::Error;

/// Which bounded wait of the handshake failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Initiator answering `request-public-key`
    PublicKey,
    /// Joiner answering `public-key` with its encrypted identifier
    Identifier,
}

impl HandshakeStep {
    pub fn event(&self) -> &'static str {
        match self {
            HandshakeStep::PublicKey => "request-public-key",
            HandshakeStep::Identifier => "public-key",
        }
    }
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeStep::PublicKey => write!(f, "initiator response to \"{}\"", self.event()),
            HandshakeStep::Identifier => write!(f, "joiner response to \"{}\"", self.event()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediatorError {
    /// Join referenced an id that is not currently waiting
    #[error("Invalid tunnel ID")]
    NotFound,

    #[error("Timed out waiting for {step}")]
    HandshakeTimeout { step: HandshakeStep },

    #[error("Invalid {step}")]
    MalformedHandshakeResponse { step: HandshakeStep },

    #[error("{0}")]
    ProtocolViolation(String),

    #[error("The other side disconnected.")]
    PeerDisconnected,

    #[error("Could not allocate a tunnel ID after {attempts} attempts")]
    IdSpaceExhausted { attempts: usize },

    #[error("Connection is already attached to a tunnel")]
    AlreadyAttached,

    /// The tunnel was released while an operation on it was pending
    #[error("Tunnel closed")]
    TunnelClosed,
}

impl MediatorError {
    pub fn violation(message: impl Into<String>) -> Self {
        MediatorError::ProtocolViolation(message.into())
    }

    /// Whether this error ends the whole tunnel rather than a single request
    pub fn is_tunnel_fatal(&self) -> bool {
        !matches!(self, MediatorError::NotFound | MediatorError::IdSpaceExhausted { .. })
    }
}
