//! BeaconController: lifecycle state machine, announcement loop, and
//! receive/reply logic.
//!
//! # Lifecycle
//!
//! ```text
//!            start()            transport ready
//!   Idle ──────────────► Starting ──────────────► Running
//!    ▲                      │  │                     │
//!    │   acquisition failed │  │ stop()              │ stop() / send failure
//!    └──────────────────────┘  ▼                     ▼
//!    ◄─────────────────────── Stopping ◄─────────────┘
//! ```
//!
//! # Architecture
//!
//! All mutable state (the current [`BeaconSession`], its registry, its
//! sequence counter) is owned by a single Tokio task.  The task `select!`s
//! over three sources:
//!
//! - commands from [`BeaconController`] handles (start, stop, queries),
//! - the pending transport-open future while `Starting`,
//! - the session's inbound datagram queue and scheduler ticks while `Running`.
//!
//! Only one event is processed at a time, so the registry needs no lock.
//! Each session owns its channels; tearing a session down drops anything
//! still queued, which is what makes `stop()` final.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::protocol::messages::{ANNOUNCE_INTERVAL, BEACON_PORT, MULTICAST_GROUP};
use beacon_core::protocol::{current_timestamp_ms, SequenceCounter};
use beacon_core::{
    BeaconMessage, Freshness, FreshnessPolicy, PeerAddress, PeerRegistry, ProtocolError,
    SessionId, WireFormat,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::application::observer::{BeaconObserver, PeerView};
use crate::application::scheduler::{schedule, ScheduleHandle};
use crate::application::transport::{
    Datagram, OpenedTransport, Transport, TransportError, TransportFactory, TransportOptions,
};

const COMMAND_QUEUE_DEPTH: usize = 32;

// ── Public types ──────────────────────────────────────────────────────────────

/// Lifecycle state of the beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeaconState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Current state plus the last user-visible error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconStatus {
    pub state: BeaconState,
    pub last_error: Option<String>,
}

impl Default for BeaconStatus {
    fn default() -> Self {
        Self {
            state: BeaconState::Idle,
            last_error: None,
        }
    }
}

/// Runtime configuration of the beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconConfig {
    /// Port bound locally, announced to, and replied to.
    pub port: u16,
    pub multicast_group: Ipv4Addr,
    pub announce_interval: Duration,
    pub freshness: FreshnessPolicy,
    /// Deliver this host's own multicast datagrams back to it.
    pub loopback: bool,
    pub wire_format: WireFormat,
}

impl BeaconConfig {
    /// Destination of periodic announcements.
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::from((self.multicast_group, self.port))
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            port: BEACON_PORT,
            multicast_group: MULTICAST_GROUP,
            announce_interval: ANNOUNCE_INTERVAL,
            freshness: FreshnessPolicy::default(),
            loopback: false,
            wire_format: WireFormat::Structured,
        }
    }
}

/// Errors surfaced by [`BeaconController`].
#[derive(Debug, Error)]
pub enum BeaconError {
    /// Opening the socket or joining the group failed.
    #[error("failed to acquire beacon transport: {0}")]
    TransportAcquisitionFailed(#[source] TransportError),
    /// An announcement or a reply could not be sent.
    #[error("failed to send beacon datagram: {0}")]
    SendFailed(#[source] TransportError),
    /// An outgoing message could not be encoded.
    #[error("failed to encode beacon message: {0}")]
    Encode(#[source] ProtocolError),
    /// `start()` was called while a session exists.
    #[error("beacon is {state:?}; start requires Idle")]
    NotIdle { state: BeaconState },
    /// `stop()` arrived before the transport was ready.
    #[error("start was aborted by stop")]
    StartAborted,
    /// The controller task is gone.
    #[error("beacon controller task has shut down")]
    ControllerGone,
}

// ── Handle ────────────────────────────────────────────────────────────────────

enum Command {
    Start(oneshot::Sender<Result<SessionId, BeaconError>>),
    Stop {
        reason: Option<String>,
        done: oneshot::Sender<()>,
    },
    Snapshot(oneshot::Sender<Vec<PeerView>>),
    Classify {
        address: PeerAddress,
        reply: oneshot::Sender<Option<Freshness>>,
    },
}

/// Cloneable handle to the beacon controller task.
///
/// The task runs until every handle has been dropped, then stops any running
/// session silently.
#[derive(Clone)]
pub struct BeaconController {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<BeaconStatus>,
}

impl BeaconController {
    /// Spawns the controller task on the current Tokio runtime.
    pub fn spawn(
        config: BeaconConfig,
        factory: Arc<dyn TransportFactory>,
        observer: Arc<dyn BeaconObserver>,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (status_tx, status) = watch::channel(BeaconStatus::default());

        let task = ControllerTask {
            config,
            factory,
            observer,
            status: status_tx,
            phase: Phase::Idle,
        };
        tokio::spawn(task.run(command_rx));

        Self { commands, status }
    }

    /// Starts a new session and waits until it is `Running`.
    ///
    /// Returns the new session id.
    ///
    /// # Errors
    ///
    /// - [`BeaconError::NotIdle`] if a session already exists.
    /// - [`BeaconError::TransportAcquisitionFailed`] if the socket could not
    ///   be opened or the group joined; the controller is `Idle` again.
    /// - [`BeaconError::StartAborted`] if `stop()` won the race.
    pub async fn start(&self) -> Result<SessionId, BeaconError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start(reply)).await?;
        rx.await.map_err(|_| BeaconError::ControllerGone)?
    }

    /// Stops the current session, if any, and waits for teardown.
    ///
    /// A `reason` is recorded as the user-visible last error.  Stopping an
    /// idle beacon does nothing.
    pub async fn stop(&self, reason: Option<String>) -> Result<(), BeaconError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Stop { reason, done }).await?;
        rx.await.map_err(|_| BeaconError::ControllerGone)
    }

    /// Returns the current peers with their freshness; empty while idle.
    pub async fn snapshot(&self) -> Result<Vec<PeerView>, BeaconError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| BeaconError::ControllerGone)
    }

    /// Classifies one peer; `None` if it is unknown to the current session.
    pub async fn classify(&self, address: PeerAddress) -> Result<Option<Freshness>, BeaconError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Classify { address, reply }).await?;
        rx.await.map_err(|_| BeaconError::ControllerGone)
    }

    pub fn state(&self) -> BeaconState {
        self.status.borrow().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    pub fn status(&self) -> BeaconStatus {
        self.status.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<BeaconStatus> {
        self.status.clone()
    }

    async fn send(&self, command: Command) -> Result<(), BeaconError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BeaconError::ControllerGone)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Everything that lives exactly as long as one `start()` … `stop()` run.
struct BeaconSession {
    id: SessionId,
    sequence: SequenceCounter,
    registry: PeerRegistry,
    transport: Box<dyn Transport>,
    inbound: mpsc::Receiver<Datagram>,
    ticks: mpsc::UnboundedReceiver<()>,
    announcer: ScheduleHandle,
}

impl BeaconSession {
    fn begin(id: SessionId, opened: OpenedTransport, config: &BeaconConfig) -> Self {
        let (tick_tx, ticks) = mpsc::unbounded_channel();
        let announcer = schedule(config.announce_interval, move || {
            let _ = tick_tx.send(());
        });

        Self {
            id,
            sequence: SequenceCounter::new(),
            registry: PeerRegistry::new(config.freshness),
            transport: opened.transport,
            inbound: opened.inbound,
            ticks,
            announcer,
        }
    }

    async fn next_event(&mut self) -> PhaseEvent {
        tokio::select! {
            datagram = self.inbound.recv() => PhaseEvent::Inbound(datagram),
            Some(()) = self.ticks.recv() => PhaseEvent::Tick,
        }
    }

    /// Sends the next numbered announcement to the group.
    async fn announce(&mut self, config: &BeaconConfig) -> Result<u64, BeaconError> {
        let seq = self.sequence.next_seq();
        let message = BeaconMessage::ping(self.id, seq, current_timestamp_ms());
        let payload = config
            .wire_format
            .encode(&message)
            .map_err(BeaconError::Encode)?;
        self.transport
            .send(&payload, config.group_addr())
            .await
            .map_err(BeaconError::SendFailed)?;
        Ok(seq)
    }

    /// Handles one inbound datagram.
    ///
    /// Returns `true` if the registry was updated.
    async fn receive(
        &mut self,
        datagram: Datagram,
        config: &BeaconConfig,
        now: Instant,
    ) -> Result<bool, BeaconError> {
        let message = match config.wire_format.decode(&datagram.data) {
            Ok(message) => message,
            Err(e) => {
                debug!("dropping undecodable datagram from {}: {e}", datagram.source);
                return Ok(false);
            }
        };

        // A PONG echoes the PING it answers, so only PINGs can be self echoes.
        if message.is_ping() && message.id == self.id {
            trace!("ignoring own announcement seq={}", message.seq);
            return Ok(false);
        }

        let sender = datagram.source.ip();
        if self.registry.touch(sender, now) {
            info!("discovered peer {sender}");
        }

        if message.is_ping() {
            // Literal PINGs carry no id, so they are answered where they came
            // from; structured ones on the well-known port.
            let dest = match config.wire_format {
                WireFormat::Structured => SocketAddr::new(sender, config.port),
                WireFormat::Literal => datagram.source,
            };
            let payload = config
                .wire_format
                .encode(&message.into_pong())
                .map_err(BeaconError::Encode)?;
            self.transport
                .send(&payload, dest)
                .await
                .map_err(BeaconError::SendFailed)?;
            debug!("answered PING from {} with PONG to {dest}", datagram.source);
        }

        Ok(true)
    }

    fn views(&self, now: Instant) -> Vec<PeerView> {
        let policy = self.registry.policy();
        self.registry
            .snapshot()
            .iter()
            .map(|entry| PeerView::from_entry(entry, &policy, now))
            .collect()
    }

    fn close(mut self) {
        self.announcer.cancel();
        self.inbound.close();
        self.transport.close();
        self.registry.clear();
    }
}

// ── Controller task ───────────────────────────────────────────────────────────

type OpenFuture = Pin<Box<dyn Future<Output = Result<OpenedTransport, TransportError>> + Send>>;

struct PendingStart {
    session_id: SessionId,
    opening: OpenFuture,
    reply: oneshot::Sender<Result<SessionId, BeaconError>>,
}

enum Phase {
    Idle,
    Starting(PendingStart),
    Running(BeaconSession),
}

enum PhaseEvent {
    Opened(Result<OpenedTransport, TransportError>),
    Inbound(Option<Datagram>),
    Tick,
}

/// Waits for the next event of the current phase; never resolves while idle.
async fn next_phase_event(phase: &mut Phase) -> PhaseEvent {
    match phase {
        Phase::Idle => std::future::pending::<PhaseEvent>().await,
        Phase::Starting(pending) => PhaseEvent::Opened(pending.opening.as_mut().await),
        Phase::Running(session) => session.next_event().await,
    }
}

/// Reads the Tokio clock so paused-time tests control peer ages.
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

struct ControllerTask {
    config: BeaconConfig,
    factory: Arc<dyn TransportFactory>,
    observer: Arc<dyn BeaconObserver>,
    status: watch::Sender<BeaconStatus>,
    phase: Phase,
}

impl ControllerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_phase_event(&mut self.phase) => self.handle_phase_event(event).await,
            }
        }

        self.stop(None);
        debug!("beacon controller task exiting");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => self.begin_start(reply),
            Command::Stop { reason, done } => {
                self.stop(reason);
                let _ = done.send(());
            }
            Command::Snapshot(reply) => {
                let now = clock_now();
                self.sweep_expired(now);
                let peers = match &self.phase {
                    Phase::Running(session) => session.views(now),
                    _ => Vec::new(),
                };
                let _ = reply.send(peers);
            }
            Command::Classify { address, reply } => {
                let now = clock_now();
                self.sweep_expired(now);
                let freshness = match &self.phase {
                    Phase::Running(session) => session.registry.classify(address, now),
                    _ => None,
                };
                let _ = reply.send(freshness);
            }
        }
    }

    async fn handle_phase_event(&mut self, event: PhaseEvent) {
        match event {
            PhaseEvent::Opened(result) => self.finish_start(result),
            PhaseEvent::Tick => self.announce().await,
            PhaseEvent::Inbound(Some(datagram)) => self.receive(datagram).await,
            PhaseEvent::Inbound(None) => {
                self.stop(Some("beacon transport closed unexpectedly".to_string()));
            }
        }
    }

    fn begin_start(&mut self, reply: oneshot::Sender<Result<SessionId, BeaconError>>) {
        if !matches!(self.phase, Phase::Idle) {
            let state = self.status.borrow().state;
            let _ = reply.send(Err(BeaconError::NotIdle { state }));
            return;
        }

        let session_id = Uuid::new_v4();
        let options = TransportOptions {
            port: self.config.port,
            loopback: self.config.loopback,
        };
        let group = self.config.multicast_group;
        let factory = Arc::clone(&self.factory);

        let opening: OpenFuture = Box::pin(async move {
            let opened = factory.open(options).await?;
            if let Err(e) = opened.transport.join_multicast_group(group) {
                opened.transport.close();
                return Err(e);
            }
            Ok(opened)
        });

        info!("starting beacon session {session_id} on port {}", options.port);
        self.set_status(BeaconState::Starting, None);
        self.phase = Phase::Starting(PendingStart {
            session_id,
            opening,
            reply,
        });
    }

    fn finish_start(&mut self, result: Result<OpenedTransport, TransportError>) {
        let pending = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Starting(pending) => pending,
            other => {
                self.phase = other;
                return;
            }
        };

        match result {
            Ok(opened) => {
                let session = BeaconSession::begin(pending.session_id, opened, &self.config);
                self.phase = Phase::Running(session);
                info!(
                    "beacon session {} running; announcing to {} every {:?}",
                    pending.session_id,
                    self.config.group_addr(),
                    self.config.announce_interval
                );
                self.set_status(BeaconState::Running, None);
                let _ = pending.reply.send(Ok(pending.session_id));
            }
            Err(e) => {
                let err = BeaconError::TransportAcquisitionFailed(e);
                error!("{err}");
                self.set_status(BeaconState::Idle, Some(err.to_string()));
                let _ = pending.reply.send(Err(err));
            }
        }
    }

    async fn announce(&mut self) {
        let Phase::Running(session) = &mut self.phase else {
            return;
        };
        match session.announce(&self.config).await {
            Ok(seq) => debug!("announced seq={seq} to {}", self.config.group_addr()),
            Err(e) => {
                error!("announcement failed: {e}");
                self.stop(Some(e.to_string()));
                return;
            }
        }
        self.publish_peers(clock_now());
    }

    async fn receive(&mut self, datagram: Datagram) {
        let now = clock_now();
        let Phase::Running(session) = &mut self.phase else {
            return;
        };
        match session.receive(datagram, &self.config, now).await {
            Ok(true) => self.publish_peers(now),
            Ok(false) => {}
            Err(e) => {
                error!("reply failed: {e}");
                self.stop(Some(e.to_string()));
            }
        }
    }

    /// Evicts expired peers and pushes the resulting list to the observer.
    fn publish_peers(&mut self, now: Instant) {
        let Phase::Running(session) = &mut self.phase else {
            return;
        };
        for address in session.registry.evict_expired(now) {
            info!("peer {address} expired");
        }
        self.observer.on_peer_list_changed(session.views(now));
    }

    /// Evicts expired peers, notifying the observer only if any were removed.
    fn sweep_expired(&mut self, now: Instant) {
        let Phase::Running(session) = &mut self.phase else {
            return;
        };
        let expired = session.registry.evict_expired(now);
        if !expired.is_empty() {
            for address in &expired {
                info!("peer {address} expired");
            }
            self.observer.on_peer_list_changed(session.views(now));
        }
    }

    fn stop(&mut self, reason: Option<String>) {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return,
            Phase::Starting(pending) => {
                self.set_status(BeaconState::Stopping, None);
                drop(pending.opening);
                let _ = pending.reply.send(Err(BeaconError::StartAborted));
            }
            Phase::Running(session) => {
                self.set_status(BeaconState::Stopping, None);
                session.close();
            }
        }

        match &reason {
            Some(reason) => warn!("beacon stopped: {reason}"),
            None => info!("beacon stopped"),
        }
        self.observer.on_peer_list_changed(Vec::new());
        self.set_status(BeaconState::Idle, reason);
    }

    fn set_status(&self, state: BeaconState, error: Option<String>) {
        debug!("beacon state -> {state:?}");
        self.status.send_replace(BeaconStatus {
            state,
            last_error: error.clone(),
        });
        self.observer.on_state_change(state, error);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
