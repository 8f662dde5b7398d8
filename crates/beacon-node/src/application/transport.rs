//! Transport seam: the datagram capability the controller consumes.
//!
//! The controller never touches a socket directly.  It asks a
//! [`TransportFactory`] to open a [`Transport`] bound to the beacon port and
//! then only joins a group, sends datagrams, and closes.  Inbound datagrams
//! arrive on the `mpsc` receiver returned by `open`, in arrival order.
//!
//! Infrastructure implementations use a UDP socket; tests use the in-memory
//! network in `infrastructure::transport::memory`.

use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be created or bound.
    #[error("failed to bind beacon socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    /// The multicast group could not be joined.
    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: Ipv4Addr,
        #[source]
        source: std::io::Error,
    },
    /// A datagram could not be handed to the network.
    #[error("failed to send datagram to {dest}: {source}")]
    Send {
        dest: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The transport was used after `close`.
    #[error("transport is closed")]
    Closed,
}

/// One inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub data: Vec<u8>,
    /// Address and port the datagram came from.
    pub source: SocketAddr,
}

/// Options for [`TransportFactory::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Local port to bind.
    pub port: u16,
    /// Whether this host's own multicast datagrams are delivered back to it.
    pub loopback: bool,
}

/// An opened transport together with its inbound datagram stream.
pub struct OpenedTransport {
    pub transport: Box<dyn Transport>,
    pub inbound: mpsc::Receiver<Datagram>,
}

/// Datagram send capability over a bound socket.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribes the socket to `group`.
    fn join_multicast_group(&self, group: Ipv4Addr) -> Result<(), TransportError>;

    /// Sends `payload` to `dest` (a group or a single host).
    async fn send(&self, payload: &[u8], dest: SocketAddr) -> Result<(), TransportError>;

    /// Releases the socket; the inbound stream ends shortly after.
    fn close(&self);
}

/// Acquires transports.  Opening is asynchronous and must complete before
/// the transport is used.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, options: TransportOptions) -> Result<OpenedTransport, TransportError>;
}
