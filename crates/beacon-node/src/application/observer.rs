//! UI collaborator seam.
//!
//! The controller pushes every lifecycle transition and every change of the
//! peer list to a [`BeaconObserver`].  Rendering is entirely the observer's
//! business; the controller only guarantees that the calls arrive in the
//! order the changes happened.

use std::time::{Duration, Instant};

use beacon_core::{Freshness, FreshnessPolicy, PeerAddress, PeerEntry};

use crate::application::controller::BeaconState;

/// One peer as presented to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerView {
    pub address: PeerAddress,
    /// Whole seconds since the peer was last heard from.
    pub age_secs: u64,
    pub freshness: Freshness,
}

impl PeerView {
    /// Classifies a registry entry at `now` under `policy`.
    pub fn from_entry(entry: &PeerEntry, policy: &FreshnessPolicy, now: Instant) -> Self {
        let age: Duration = entry.age(now);
        Self {
            address: entry.address,
            age_secs: age.as_secs(),
            freshness: policy.classify_age(age),
        }
    }
}

/// Receives lifecycle and peer-list notifications from the controller.
///
/// Calls are made from the controller task and must not block.
pub trait BeaconObserver: Send + Sync {
    /// The lifecycle state changed.  `error` is set when the transition was
    /// caused by a failure the user needs to see.
    fn on_state_change(&self, state: BeaconState, error: Option<String>);

    /// The set of known peers (or their freshness) changed.
    fn on_peer_list_changed(&self, peers: Vec<PeerView>);
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl BeaconObserver for NoopObserver {
    fn on_state_change(&self, _state: BeaconState, _error: Option<String>) {}

    fn on_peer_list_changed(&self, _peers: Vec<PeerView>) {}
}
