//! Application layer of the beacon node.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure rules: the peer registry and wire messages in `beacon_core`) and the
//! infrastructure (sockets, files, the UI).
//!
//! Code in this layer:
//!
//! - **Orchestrates** domain objects to fulfil a user goal (e.g., "announce
//!   this host every five seconds and keep track of who answers").
//! - **Depends on abstractions** (the [`transport::TransportFactory`] and
//!   [`observer::BeaconObserver`] traits) so the infrastructure can be
//!   swapped without changing this code.
//! - **Contains no direct socket or file-system calls**.
//!
//! # Sub-modules
//!
//! - **`controller`** – The beacon lifecycle state machine.  Owns the running
//!   session, sends announcements, answers PINGs, and publishes the peer list.
//!
//! - **`scheduler`** – Fires the announcement tick immediately and then once
//!   per interval until cancelled.
//!
//! - **`transport`** – The datagram seam the controller sends and receives
//!   through.
//!
//! - **`observer`** – The seam the controller reports state and peer-list
//!   changes to.

pub mod controller;
pub mod observer;
pub mod scheduler;
pub mod transport;
