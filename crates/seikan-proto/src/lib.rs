//! Seikan Protocol Definitions
//!
//! This crate defines the wire messages exchanged between endpoints and the
//! mediator, the frame codec, and the HTTP probe documents.

pub mod codec;
pub mod discovery;
pub mod messages;

pub use codec::{decode_client_frame, decode_client_frame_limited, encode_server_frame, CodecError};
pub use discovery::{ProbeResponse, StatusResponse, PROBE_PATH, STATUS_PATH, WS_PATH};
pub use messages::*;

/// Protocol version advertised by the liveness probe.
///
/// Clients only compare the major component.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default maximum WebSocket message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
