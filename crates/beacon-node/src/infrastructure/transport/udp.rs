//! UDP multicast transport.
//!
//! The socket is created with `socket2` so the options that must be set
//! before `bind` (address reuse, multicast loopback) can be applied, then
//! handed to Tokio.  A background task reads datagrams and forwards them on
//! the inbound channel returned by [`TransportFactory::open`].
//!
//! # How multicast works here (for beginners)
//!
//! Every beacon binds the same well-known port and joins the same group
//! address (`224.0.0.255` by default).  A datagram sent to `group:port` is
//! delivered by the network stack to every socket on the LAN that joined the
//! group on that port.  `SO_REUSEADDR` lets several beacons share the port on
//! one machine.  Multicast loopback decides whether this host also receives
//! its own announcements.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::transport::{
    Datagram, OpenedTransport, Transport, TransportError, TransportFactory, TransportOptions,
};

/// Largest datagram we expect; announcements are well under 200 bytes.
const RECV_BUFFER_SIZE: usize = 2048;

/// Inbound datagrams buffered before the receive task waits for the
/// controller.
const INBOUND_QUEUE_DEPTH: usize = 256;

/// Opens [`UdpTransport`]s bound to `bind_ip`.
#[derive(Debug, Clone, Copy)]
pub struct UdpTransportFactory {
    bind_ip: Ipv4Addr,
}

impl UdpTransportFactory {
    pub fn new(bind_ip: Ipv4Addr) -> Self {
        Self { bind_ip }
    }
}

impl Default for UdpTransportFactory {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED)
    }
}

#[async_trait]
impl TransportFactory for UdpTransportFactory {
    async fn open(&self, options: TransportOptions) -> Result<OpenedTransport, TransportError> {
        let (transport, inbound) = UdpTransport::bind(self.bind_ip, options)?;
        Ok(OpenedTransport {
            transport: Box::new(transport),
            inbound,
        })
    }
}

/// A bound UDP socket plus its receive task.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    interface: Ipv4Addr,
    closed: AtomicBool,
    recv_task: JoinHandle<()>,
}

impl UdpTransport {
    /// Binds `bind_ip:options.port` and starts the receive task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the socket cannot be created,
    /// configured, or bound.
    pub fn bind(
        bind_ip: Ipv4Addr,
        options: TransportOptions,
    ) -> Result<(Self, mpsc::Receiver<Datagram>), TransportError> {
        let bind_err = |source| TransportError::Bind {
            port: options.port,
            source,
        };

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket
            .set_multicast_loop_v4(options.loopback)
            .map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let addr = SocketAddr::V4(SocketAddrV4::new(bind_ip, options.port));
        socket.bind(&addr.into()).map_err(bind_err)?;

        let socket = Arc::new(UdpSocket::from_std(socket.into()).map_err(bind_err)?);
        let local = socket.local_addr().map_err(bind_err)?;
        info!("beacon socket bound on {local} (loopback={})", options.loopback);

        let (tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let recv_task = tokio::spawn(recv_loop(Arc::clone(&socket), tx));

        Ok((
            Self {
                socket,
                interface: bind_ip,
                closed: AtomicBool::new(false),
                recv_task,
            },
            inbound,
        ))
    }

    /// Address the socket is actually bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn join_multicast_group(&self, group: Ipv4Addr) -> Result<(), TransportError> {
        self.socket
            .join_multicast_v4(group, self.interface)
            .map_err(|source| TransportError::JoinGroup { group, source })?;
        debug!("joined multicast group {group} on {}", self.interface);
        Ok(())
    }

    async fn send(&self, payload: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.socket
            .send_to(payload, dest)
            .await
            .map_err(|source| TransportError::Send { dest, source })?;
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.recv_task.abort();
            debug!("beacon socket closed");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Forwards every received datagram until the socket fails or the
/// controller drops the inbound receiver.
async fn recv_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<Datagram>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, source)) => {
                let datagram = Datagram {
                    data: buf[..len].to_vec(),
                    source,
                };
                if tx.send(datagram).await.is_err() {
                    break;
                }
            }
            // Windows reports ICMP port-unreachable from an earlier send here.
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!("ignoring connection reset on beacon socket");
            }
            Err(e) => {
                warn!("beacon socket receive failed: {e}");
                break;
            }
        }
    }
}
