//! JSON frame codec
//!
//! One message per WebSocket text frame.

use crate::messages::{ClientMessage, ServerMessage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Binary frames are not supported")]
    UnsupportedFrame,
}

/// Decode a client text frame
pub fn decode_client_frame(text: &str) -> Result<ClientMessage, CodecError> {
    let message = serde_json::from_str(text)?;
    Ok(message)
}

/// Decode a client text frame, rejecting frames over `max` bytes before parsing
pub fn decode_client_frame_limited(text: &str, max: usize) -> Result<ClientMessage, CodecError> {
    if text.len() > max {
        return Err(CodecError::TooLarge {
            size: text.len(),
            max,
        });
    }
    decode_client_frame(text)
}

/// Encode a mediator message as a text frame
pub fn encode_server_frame(message: &ServerMessage) -> Result<String, CodecError> {
    let text = serde_json::to_string(message)?;
    tracing::trace!("Encoded {} frame ({} bytes)", message.event(), text.len());
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_new() {
        let msg = decode_client_frame(r#"{"event":"new"}"#).unwrap();
        assert_eq!(msg, ClientMessage::New);
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = decode_client_frame(r#"{"event":"teleport"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
        assert!(err.to_string().starts_with("Malformed request"));
    }

    #[test]
    fn test_decode_not_json() {
        assert!(decode_client_frame("hello").is_err());
    }

    #[test]
    fn test_decode_limited_rejects_oversized() {
        let frame = r#"{"event":"new"}"#;
        let err = decode_client_frame_limited(frame, 4).unwrap_err();
        assert!(matches!(err, CodecError::TooLarge { max: 4, .. }));
        assert!(decode_client_frame_limited(frame, frame.len()).is_ok());
    }

    #[test]
    fn test_encode_error() {
        let text = encode_server_frame(&ServerMessage::error("Invalid tunnel ID")).unwrap();
        assert_eq!(text, r#"{"event":"error","message":"Invalid tunnel ID"}"#);
    }
}
