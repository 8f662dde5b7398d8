//! Infrastructure layer of the beacon node.
//!
//! Contains OS-facing adapters: the UDP multicast socket, an in-memory
//! network for tests, TOML configuration storage, and the UI bridge.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `beacon_core`, but MUST NOT be imported by the `application` layer.

pub mod storage;
pub mod transport;
pub mod ui_bridge;
