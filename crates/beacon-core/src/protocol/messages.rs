//! Beacon protocol message types and well-known constants.
//!
//! There are only two messages on the wire:
//!
//! - `PING` – the periodic announcement multicast to the group.  Receiving
//!   one tells the listener the sender is alive and asks it to reply.
//! - `PONG` – the direct (unicast) reply to a `PING`.  Receiving one is a
//!   passive liveness signal and is never answered.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Well-known UDP port every beacon binds and announces to.
pub const BEACON_PORT: u16 = 9903;

/// Multicast group the announcements are sent to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 255);

/// Delay between two consecutive announcements of one session.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(5000);

/// Random identifier of one beacon session (UUID v4).
///
/// A new id is generated on every start, so peers can tell two runs of the
/// same host apart.
pub type SessionId = Uuid;

// ── Message type ──────────────────────────────────────────────────────────────

/// Discriminates announcements from replies.
///
/// Serialized as the upper-case words `"PING"` / `"PONG"` so that the JSON
/// payload and the literal payload share the same vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Ping,
    Pong,
}

impl MessageType {
    /// Returns the on-wire spelling of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
        }
    }

    /// Parses the on-wire spelling; the match is exact (case-sensitive).
    pub fn from_wire(text: &str) -> Option<Self> {
        match text {
            "PING" => Some(MessageType::Ping),
            "PONG" => Some(MessageType::Pong),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Beacon message ────────────────────────────────────────────────────────────

/// The payload of every beacon datagram.
///
/// ```text
/// {"type":"PING","id":"5f0c…","seq":3,"time":1700000000000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconMessage {
    /// `PING` or `PONG`.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Session id of the node that produced the original `PING`.
    pub id: SessionId,
    /// Announcement number within the session, starting at 1.
    pub seq: u64,
    /// Sender wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Informational only; never used for ordering or latency.
    #[serde(default)]
    pub time: u64,
}

impl BeaconMessage {
    /// Builds the `seq`-th announcement of session `id`.
    pub fn ping(id: SessionId, seq: u64, time: u64) -> Self {
        Self {
            message_type: MessageType::Ping,
            id,
            seq,
            time,
        }
    }

    /// Turns a received `PING` into its reply.
    ///
    /// The reply echoes `id`, `seq`, and `time` unchanged so the original
    /// sender can match it to the announcement that triggered it.
    pub fn into_pong(self) -> Self {
        Self {
            message_type: MessageType::Pong,
            ..self
        }
    }

    /// Returns `true` for announcements that must be answered.
    pub fn is_ping(&self) -> bool {
        self.message_type == MessageType::Ping
    }
}
