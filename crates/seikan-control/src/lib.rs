//! Tunnel rendezvous, handshake orchestration and relay for the mediator
pub mod config;
pub mod connection;
pub mod error;
pub mod gate;
pub mod handler;
pub mod handshake;
pub mod pending_acks;
pub mod registry;
pub mod task_tracker;
pub mod tunnel_id;

pub use config::MediatorConfig;
pub use connection::{ConnectionId, OutboundReceiver, Outgoing, PeerConnection, WaitError};
pub use error::{HandshakeStep, MediatorError};
pub use gate::{AcceptGate, GateProgress};
pub use handler::TunnelHandler;
pub use handshake::{HandshakeFailure, HandshakeOrchestrator};
pub use pending_acks::PendingAcks;
pub use registry::{
    AcceptOutcome, PairedTunnel, RegistryStats, RelayRefusal, ReleasedTunnel, Role,
    TunnelRegistry, TunnelState,
};
pub use task_tracker::TaskTracker;
pub use tunnel_id::{RandomTunnelIdGenerator, ScriptedTunnelIdGenerator, TunnelId, TunnelIdGenerator};
