//! UI bridge: exposes controller operations and notifications to a front end.
//!
//! A front end (desktop shell, web view, or the headless binary) never talks
//! to [`BeaconController`] types directly.  It calls the command functions in
//! this module and receives plain, JSON-serialisable DTOs.
//!
//! # Data Transfer Objects (DTOs)
//!
//! - [`PeerDto`] – one peer with a ready-made `label`: the bare address while
//!   fresh, `"addr (age)"` once stale so the UI can dim or strike it through.
//! - [`StatusDto`] – lifecycle state plus the last user-visible error.
//!
//! # `CommandResult<T>` wrapper
//!
//! Every command returns `CommandResult<T>`:
//! `{ success: bool, data: T | null, error: string | null }`, so the caller can
//! always inspect `success` without separate error plumbing.

use std::sync::Mutex;

use beacon_core::Freshness;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::controller::{BeaconController, BeaconState, BeaconStatus};
use crate::application::observer::{BeaconObserver, PeerView};

// ── Data Transfer Objects ─────────────────────────────────────────────────────

/// DTO representing one known peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDto {
    pub address: String,
    pub age_secs: u64,
    pub freshness: Freshness,
    /// Display text: `"10.0.0.2"` when fresh, `"10.0.0.2 (42s)"` when stale.
    pub label: String,
}

impl From<&PeerView> for PeerDto {
    fn from(view: &PeerView) -> Self {
        let address = view.address.to_string();
        let label = match view.freshness {
            Freshness::Fresh => address.clone(),
            Freshness::Stale => format!("{address} ({}s)", view.age_secs),
        };
        Self {
            address,
            age_secs: view.age_secs,
            freshness: view.freshness,
            label,
        }
    }
}

/// DTO for the lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDto {
    pub state: String,
    pub running: bool,
    pub last_error: Option<String>,
}

impl From<&BeaconStatus> for StatusDto {
    fn from(status: &BeaconStatus) -> Self {
        Self {
            state: format!("{:?}", status.state),
            running: status.state == BeaconState::Running,
            last_error: status.last_error.clone(),
        }
    }
}

/// Unified response wrapper used by UI commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandResult<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> CommandResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Starts the beacon; returns the new session id.
pub async fn start_beacon(controller: &BeaconController) -> CommandResult<String> {
    match controller.start().await {
        Ok(session_id) => CommandResult::ok(session_id.to_string()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Stops the beacon (user-initiated, no error is recorded).
pub async fn stop_beacon(controller: &BeaconController) -> CommandResult<()> {
    match controller.stop(None).await {
        Ok(()) => CommandResult::ok(()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Returns the current peer list.
pub async fn get_peers(controller: &BeaconController) -> CommandResult<Vec<PeerDto>> {
    match controller.snapshot().await {
        Ok(peers) => CommandResult::ok(peers.iter().map(PeerDto::from).collect()),
        Err(e) => CommandResult::err(e.to_string()),
    }
}

/// Returns the lifecycle status.
pub fn get_status(controller: &BeaconController) -> CommandResult<StatusDto> {
    CommandResult::ok(StatusDto::from(&controller.status()))
}

// ── Logging observer ──────────────────────────────────────────────────────────

/// Observer for headless use: writes transitions and peer-list changes to
/// the log.
///
/// Peer lists are only logged when their rendered labels change, so a
/// periodic refresh with nothing new stays quiet.
#[derive(Debug, Default)]
pub struct LoggingObserver {
    last_labels: Mutex<Vec<String>>,
}

impl LoggingObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BeaconObserver for LoggingObserver {
    fn on_state_change(&self, state: BeaconState, error: Option<String>) {
        match error {
            Some(error) => warn!("beacon {state:?}: {error}"),
            None => info!("beacon {state:?}"),
        }
    }

    fn on_peer_list_changed(&self, peers: Vec<PeerView>) {
        let labels: Vec<String> = peers.iter().map(|p| PeerDto::from(p).label).collect();
        let mut last = self
            .last_labels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *last == labels {
            return;
        }
        if labels.is_empty() {
            info!("no peers");
        } else {
            info!("peers: {}", labels.join(", "));
        }
        *last = labels;
    }
}
