//! Domain entities for the LAN presence beacon.
//!
//! This module contains pure liveness bookkeeping with no infrastructure
//! dependencies: nothing in here opens a socket, starts a timer, or reads the
//! clock.  Every operation that depends on time takes `now` as an argument,
//! which keeps the rules deterministic and trivially testable.

/// Peer registry and freshness classification.
///
/// See [`registry::PeerRegistry`] for the main type.
pub mod registry;
