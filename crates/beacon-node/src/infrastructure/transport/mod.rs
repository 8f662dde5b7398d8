//! Transport implementations.
//!
//! # Sub-modules
//!
//! - **`udp`** – Real UDP socket bound to the beacon port with multicast
//!   membership, built with `socket2` and driven by Tokio.
//!
//! - **`memory`** – A simulated LAN inside one process.  Each node gets its
//!   own IP address; multicast datagrams reach every other member of the
//!   group.  Used by tests to run several beacons side by side.

pub mod memory;
pub mod udp;
