//! Integration tests for the beacon lifecycle.
//!
//! Exercises start/stop, failure paths, and state reporting of
//! `BeaconController` over the in-memory network.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_core::{decode_message, MessageType};
use beacon_node::application::controller::{
    BeaconConfig, BeaconController, BeaconError, BeaconState,
};
use beacon_node::application::observer::{BeaconObserver, NoopObserver, PeerView};
use beacon_node::infrastructure::transport::memory::MemoryNetwork;
use beacon_node::infrastructure::ui_bridge::{get_peers, get_status, start_beacon, stop_beacon};
use tokio_test::{assert_err, assert_ok};

const ALPHA: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const BRAVO: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl BeaconObserver for RecordingObserver {
    fn on_state_change(&self, state: BeaconState, error: Option<String>) {
        let entry = match error {
            Some(e) => format!("{state:?}: {e}"),
            None => format!("{state:?}"),
        };
        self.events.lock().unwrap().push(entry);
    }

    fn on_peer_list_changed(&self, peers: Vec<PeerView>) {
        self.events
            .lock()
            .unwrap()
            .push(format!("peers={}", peers.len()));
    }
}

fn node(network: &MemoryNetwork, ip: Ipv4Addr) -> BeaconController {
    BeaconController::spawn(
        BeaconConfig::default(),
        network.factory(ip),
        Arc::new(NoopObserver),
    )
}

async fn wait_until_idle(controller: &BeaconController) {
    let mut status = controller.subscribe();
    tokio::time::timeout(
        Duration::from_secs(1),
        status.wait_for(|s| s.state == BeaconState::Idle),
    )
    .await
    .expect("controller never returned to Idle")
    .expect("controller gone");
}

async fn wait_for_sends(network: &MemoryNetwork, ip: Ipv4Addr, count: usize) {
    for _ in 0..200 {
        if network.sent_from(ip).len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("{ip} sent fewer than {count} datagrams");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_sequence_restarts_at_one_for_each_session() {
    // Arrange
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);

    // Act – two announcements, restart, one announcement
    let first = assert_ok!(alpha.start().await);
    wait_for_sends(&network, ALPHA, 1).await;
    tokio::time::advance(Duration::from_secs(5)).await;
    wait_for_sends(&network, ALPHA, 2).await;
    assert_ok!(alpha.stop(None).await);
    let second = assert_ok!(alpha.start().await);
    wait_for_sends(&network, ALPHA, 3).await;

    // Assert
    let sent: Vec<_> = network
        .sent_from(ALPHA)
        .iter()
        .map(|d| decode_message(&d.payload).unwrap())
        .collect();
    let seqs: Vec<u64> = sent.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 1]);
    assert!(sent.iter().all(|m| m.message_type == MessageType::Ping));
    assert_eq!(sent[0].id, first);
    assert_eq!(sent[2].id, second);
    assert_ne!(first, second, "every session gets a fresh id");
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_peers_and_releases_port() {
    // Arrange
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);
    let bravo = node(&network, BRAVO);
    assert_ok!(alpha.start().await);
    assert_ok!(bravo.start().await);
    let mut discovered = false;
    for _ in 0..200 {
        if !assert_ok!(alpha.snapshot().await).is_empty() {
            discovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(discovered, "alpha must know bravo before stopping");
    assert!(assert_ok!(alpha.classify(IpAddr::V4(BRAVO)).await).is_some());

    // Act
    assert_ok!(alpha.stop(None).await);

    // Assert
    assert!(assert_ok!(alpha.snapshot().await).is_empty());
    assert_eq!(assert_ok!(alpha.classify(IpAddr::V4(BRAVO)).await), None);
    assert_eq!(network.endpoint_count(), 1, "only bravo is still bound");
}

#[tokio::test(start_paused = true)]
async fn test_port_in_use_fails_start_and_returns_to_idle() {
    // Arrange – two controllers on the same simulated host
    let network = MemoryNetwork::new();
    let first = node(&network, ALPHA);
    let second = node(&network, ALPHA);
    assert_ok!(first.start().await);

    // Act
    let result = second.start().await;

    // Assert
    assert!(matches!(result, Err(BeaconError::TransportAcquisitionFailed(_))));
    assert_eq!(second.state(), BeaconState::Idle);
    let error = second.last_error().expect("failure must be user-visible");
    assert!(error.contains("already bound"), "got {error}");
    assert_eq!(first.state(), BeaconState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_stops_beacon_with_error() {
    // Arrange
    let network = MemoryNetwork::new();
    network.fail_sends_from(ALPHA);
    let observer = Arc::new(RecordingObserver::default());
    let alpha = BeaconController::spawn(
        BeaconConfig::default(),
        network.factory(ALPHA),
        Arc::clone(&observer) as Arc<dyn BeaconObserver>,
    );

    // Act
    assert_ok!(alpha.start().await);
    wait_until_idle(&alpha).await;

    // Assert
    let error = alpha.last_error().expect("send failure must be surfaced");
    assert!(error.contains("simulated network failure"), "got {error}");
    assert_eq!(network.endpoint_count(), 0);
    let events = observer.events.lock().unwrap().clone();
    assert_eq!(events[0], "Starting");
    assert_eq!(events[1], "Running");
    assert_eq!(events[2], "Stopping");
    assert_eq!(events[3], "peers=0");
    assert!(events[4].starts_with("Idle: "), "got {:?}", events[4]);
}

#[tokio::test(start_paused = true)]
async fn test_double_start_is_rejected_without_side_effects() {
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);
    let id = assert_ok!(alpha.start().await);
    wait_for_sends(&network, ALPHA, 1).await;

    let second = assert_err!(alpha.start().await);

    assert!(matches!(second, BeaconError::NotIdle { state: BeaconState::Running }));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let sent = network.sent_from(ALPHA);
    assert_eq!(sent.len(), 1, "no second announcement stream");
    assert_eq!(decode_message(&sent[0].payload).unwrap().id, id);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_yield_exactly_one_session() {
    // Arrange
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);

    // Act
    let (a, b) = tokio::join!(alpha.start(), alpha.start());

    // Assert
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    assert_eq!(alpha.state(), BeaconState::Running);
    assert_eq!(network.endpoint_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_twice_is_harmless() {
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);
    assert_ok!(alpha.start().await);

    assert_ok!(alpha.stop(None).await);
    assert_ok!(alpha.stop(None).await);

    assert_eq!(alpha.state(), BeaconState::Idle);
    assert_eq!(alpha.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_start_clears_previous_error() {
    // Arrange
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);
    assert_ok!(alpha.start().await);
    assert_ok!(alpha.stop(Some("cable unplugged".to_string())).await);
    assert_eq!(alpha.last_error().as_deref(), Some("cable unplugged"));

    // Act
    assert_ok!(alpha.start().await);

    // Assert
    assert_eq!(alpha.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_ui_commands_drive_the_controller() {
    // Arrange
    let network = MemoryNetwork::new();
    let alpha = node(&network, ALPHA);

    // Act
    let started = start_beacon(&alpha).await;
    let status = get_status(&alpha);
    let peers = get_peers(&alpha).await;
    let stopped = stop_beacon(&alpha).await;

    // Assert
    assert!(started.success);
    assert_eq!(started.data.as_ref().map(String::len), Some(36), "uuid text");
    assert!(status.data.expect("status").running);
    assert_eq!(peers.data, Some(Vec::new()));
    assert!(stopped.success);
    assert!(!get_status(&alpha).data.expect("status").running);
}

#[test]
fn test_commands_fail_cleanly_once_controller_task_is_gone() {
    // Arrange – the controller task dies with the runtime it was spawned on
    let network = MemoryNetwork::new();
    let first = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let alpha = first.block_on(async { node(&network, ALPHA) });
    drop(first);

    // Act
    let second = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = second.block_on(alpha.snapshot());

    // Assert
    assert!(matches!(result, Err(BeaconError::ControllerGone)));
}
