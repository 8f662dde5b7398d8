//! Text codec for encoding and decoding beacon messages.
//!
//! Two wire formats exist.  A session picks one and never mixes them:
//!
//! ```text
//! Structured: {"type":"PING","id":"<uuid>","seq":<n>,"time":<ms>}
//! Literal:    PING
//! ```
//!
//! Both are UTF-8 text.  A payload that fails to decode is a protocol error
//! scoped to that single datagram; the caller drops it and carries on.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::messages::{BeaconMessage, MessageType};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The datagram is not valid UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The text is not a well-formed structured message.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The text is not one of the literal words `PING` / `PONG`.
    #[error("unknown literal message: {0:?}")]
    UnknownLiteral(String),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Payload format used for every datagram of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON object carrying type, session id, sequence number, and time.
    #[default]
    Structured,
    /// The bare word `PING` or `PONG`; carries no id, seq, or time.
    Literal,
}

impl WireFormat {
    /// Encodes `msg` in this format.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    pub fn encode(self, msg: &BeaconMessage) -> Result<Vec<u8>, ProtocolError> {
        match self {
            WireFormat::Structured => encode_message(msg),
            WireFormat::Literal => Ok(msg.message_type.as_str().as_bytes().to_vec()),
        }
    }

    /// Decodes one datagram payload in this format.
    ///
    /// Literal payloads decode to a message with a nil id, `seq` 0 and
    /// `time` 0, since the format carries none of them.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the bytes are not a valid message.
    pub fn decode(self, bytes: &[u8]) -> Result<BeaconMessage, ProtocolError> {
        match self {
            WireFormat::Structured => decode_message(bytes),
            WireFormat::Literal => {
                let text = std::str::from_utf8(bytes)?;
                let word = text.trim();
                let message_type = MessageType::from_wire(word)
                    .ok_or_else(|| ProtocolError::UnknownLiteral(word.to_string()))?;
                Ok(BeaconMessage {
                    message_type,
                    id: Uuid::nil(),
                    seq: 0,
                    time: 0,
                })
            }
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`BeaconMessage`] as structured JSON text.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use beacon_core::protocol::{decode_message, encode_message, BeaconMessage};
/// use uuid::Uuid;
///
/// let msg = BeaconMessage::ping(Uuid::new_v4(), 1, 0);
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(decode_message(&bytes).unwrap(), msg);
/// ```
pub fn encode_message(msg: &BeaconMessage) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a structured JSON datagram into a [`BeaconMessage`].
///
/// Field order is irrelevant and unknown fields are ignored, so newer peers
/// may add fields without breaking older ones.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] or [`ProtocolError::Malformed`].
pub fn decode_message(bytes: &[u8]) -> Result<BeaconMessage, ProtocolError> {
    let text = std::str::from_utf8(bytes)?;
    serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Returns the current wall-clock time in milliseconds since the Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
