//! Protocol message types
//!
//! Every frame is a JSON object tagged by its `event` field. Handshake blobs
//! (`publicKey`, `identifier`) are opaque to the mediator and carried as raw
//! JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages an endpoint sends to the mediator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Create a tunnel and become its initiator (A)
    New,
    /// Attach to a waiting tunnel as its joiner (B)
    Join {
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
    },
    /// Local verification succeeded on this side
    Accept,
    /// Opaque chunk for the other side. `None` when the field was omitted.
    Data {
        #[serde(default, with = "base64_chunk_option")]
        chunk: Option<Vec<u8>>,
    },
    /// Reply to a bounded-wait request carrying `ack`
    Ack {
        id: u64,
        #[serde(default)]
        payload: Value,
    },
}

impl ClientMessage {
    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            ClientMessage::New => "new",
            ClientMessage::Join { .. } => "join",
            ClientMessage::Accept => "accept",
            ClientMessage::Data { .. } => "data",
            ClientMessage::Ack { .. } => "ack",
        }
    }
}

/// Messages the mediator sends to an endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Code of the freshly created tunnel (to A)
    TunnelId {
        #[serde(rename = "tunnelId")]
        tunnel_id: String,
    },
    /// Ask A for its public key; answered with an `ack` carrying `publicKey`
    RequestPublicKey { ack: u64 },
    /// Hand A's public key to B; answered with an `ack` carrying `identifier`
    PublicKey {
        ack: u64,
        #[serde(rename = "publicKey")]
        public_key: Value,
    },
    /// B's encrypted identifier (to A)
    BIdentifier { identifier: Value },
    /// Both sides accepted; data may flow
    Connected,
    /// Relayed chunk from the other side
    Data {
        #[serde(with = "base64_chunk")]
        chunk: Vec<u8>,
    },
    /// Fatal condition; the mediator closes the connection right after
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Event name, for logging
    pub fn event(&self) -> &'static str {
        match self {
            ServerMessage::TunnelId { .. } => "tunnel-id",
            ServerMessage::RequestPublicKey { .. } => "request-public-key",
            ServerMessage::PublicKey { .. } => "public-key",
            ServerMessage::BIdentifier { .. } => "b-identifier",
            ServerMessage::Connected => "connected",
            ServerMessage::Data { .. } => "data",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Payload A puts in its `ack` to `request-public-key`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicKeyReply {
    #[serde(rename = "publicKey", default)]
    pub public_key: Value,
}

/// Payload B puts in its `ack` to `public-key`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifierReply {
    #[serde(default)]
    pub identifier: Value,
}

// Chunks travel as standard padded base64 inside JSON text frames
mod base64_chunk {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_chunk_option {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
