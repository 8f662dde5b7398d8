//! # beacon-core
//!
//! Shared library for the LAN presence beacon containing the wire protocol,
//! the per-session sequence counter, and the peer registry.
//!
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! A *beacon* is a node that periodically shouts "I'm here" to everyone on the
//! local network by sending a small datagram to an IP multicast group.  Every
//! node listening on that group hears the announcement, records the sender as
//! a live peer, and answers with a direct reply.  Peers that fall silent are
//! first shown as *stale* and eventually forgotten.
//!
//! This crate (`beacon-core`) is the pure foundation.  It defines:
//!
//! - **`protocol`** – What travels over the wire.  A [`BeaconMessage`] is
//!   either a `PING` (an announcement) or a `PONG` (a reply), encoded as a
//!   short JSON object or, in the literal format, as the bare word.
//!
//! - **`domain`** – Pure liveness bookkeeping.  The [`PeerRegistry`] maps a
//!   peer address to the instant it was last heard from, and a
//!   [`FreshnessPolicy`] decides whether that peer is fresh, stale, or gone.
//!
//! The runtime that actually opens sockets and drives timers lives in the
//! `beacon-node` crate.

pub mod domain;
pub mod protocol;

pub use domain::registry::{Freshness, FreshnessPolicy, PeerAddress, PeerEntry, PeerRegistry};
pub use protocol::codec::{decode_message, encode_message, ProtocolError, WireFormat};
pub use protocol::messages::{BeaconMessage, MessageType, SessionId};
