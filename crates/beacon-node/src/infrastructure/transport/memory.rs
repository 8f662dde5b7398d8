//! In-process simulated LAN.
//!
//! A [`MemoryNetwork`] hands out one [`TransportFactory`] per simulated host
//! IP.  Datagrams sent to a multicast group are delivered to every endpoint
//! that joined that group on the destination port, except the sender itself
//! unless it opened with `loopback`.  Unicast datagrams go to the endpoint
//! bound to exactly that address.  Every send is recorded so tests can
//! assert on the traffic.
//!
//! Delivery is synchronous (`try_send`); a full inbound queue drops the
//! datagram, as a real socket buffer would.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::application::transport::{
    Datagram, OpenedTransport, Transport, TransportError, TransportFactory, TransportOptions,
};

const INBOUND_QUEUE_DEPTH: usize = 256;

/// One datagram as it crossed the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    pub from: SocketAddr,
    pub to: SocketAddr,
    pub payload: Vec<u8>,
}

struct Endpoint {
    tx: mpsc::Sender<Datagram>,
    groups: Vec<Ipv4Addr>,
    loopback: bool,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<SocketAddr, Endpoint>,
    sent: Vec<SentDatagram>,
    failing_hosts: Vec<IpAddr>,
}

/// A shared simulated LAN.  Cloning yields another handle to the same
/// network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a factory whose transports live at `ip`.
    pub fn factory(&self, ip: impl Into<IpAddr>) -> Arc<MemoryTransportFactory> {
        Arc::new(MemoryTransportFactory {
            network: self.clone(),
            ip: ip.into(),
        })
    }

    /// Every datagram sent so far, in order.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.lock().sent.clone()
    }

    /// Datagrams sent by `ip`, in order.
    pub fn sent_from(&self, ip: impl Into<IpAddr>) -> Vec<SentDatagram> {
        let ip = ip.into();
        self.lock()
            .sent
            .iter()
            .filter(|d| d.from.ip() == ip)
            .cloned()
            .collect()
    }

    /// Makes every later send from `ip` fail with a network error.
    pub fn fail_sends_from(&self, ip: impl Into<IpAddr>) {
        self.lock().failing_hosts.push(ip.into());
    }

    /// Delivers a raw datagram as if `from` had sent it.
    ///
    /// Returns the number of endpoints that received it.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, payload: &[u8]) -> usize {
        self.lock().route(from, to, payload)
    }

    /// Number of endpoints currently bound.
    pub fn endpoint_count(&self) -> usize {
        self.lock().endpoints.len()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NetworkState {
    fn route(&mut self, from: SocketAddr, to: SocketAddr, payload: &[u8]) -> usize {
        self.sent.push(SentDatagram {
            from,
            to,
            payload: payload.to_vec(),
        });

        let mut delivered = 0;
        for (addr, endpoint) in &self.endpoints {
            let wanted = match to.ip() {
                IpAddr::V4(group) if group.is_multicast() => {
                    addr.port() == to.port()
                        && endpoint.groups.contains(&group)
                        && (*addr != from || endpoint.loopback)
                }
                _ => *addr == to,
            };
            if !wanted {
                continue;
            }
            let datagram = Datagram {
                data: payload.to_vec(),
                source: from,
            };
            if endpoint.tx.try_send(datagram).is_ok() {
                delivered += 1;
            } else {
                trace!("memory network dropped datagram for {addr}");
            }
        }
        delivered
    }
}

/// Opens [`MemoryTransport`]s at one simulated host address.
pub struct MemoryTransportFactory {
    network: MemoryNetwork,
    ip: IpAddr,
}

#[async_trait]
impl TransportFactory for MemoryTransportFactory {
    async fn open(&self, options: TransportOptions) -> Result<OpenedTransport, TransportError> {
        let local = SocketAddr::new(self.ip, options.port);
        let mut state = self.network.lock();
        if state.endpoints.contains_key(&local) {
            return Err(TransportError::Bind {
                port: options.port,
                source: std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("{local} is already bound"),
                ),
            });
        }

        let (tx, inbound) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        state.endpoints.insert(
            local,
            Endpoint {
                tx,
                groups: Vec::new(),
                loopback: options.loopback,
            },
        );
        drop(state);

        Ok(OpenedTransport {
            transport: Box::new(MemoryTransport {
                network: self.network.clone(),
                local,
                closed: AtomicBool::new(false),
            }),
            inbound,
        })
    }
}

/// One bound endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: SocketAddr,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn join_multicast_group(&self, group: Ipv4Addr) -> Result<(), TransportError> {
        let mut state = self.network.lock();
        match state.endpoints.get_mut(&self.local) {
            Some(endpoint) => {
                if !endpoint.groups.contains(&group) {
                    endpoint.groups.push(group);
                }
                Ok(())
            }
            None => Err(TransportError::Closed),
        }
    }

    async fn send(&self, payload: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut state = self.network.lock();
        if state.failing_hosts.contains(&self.local.ip()) {
            return Err(TransportError::Send {
                dest,
                source: std::io::Error::new(
                    std::io::ErrorKind::NetworkUnreachable,
                    "simulated network failure",
                ),
            });
        }
        state.route(self.local, dest, payload);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.network.lock().endpoints.remove(&self.local);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 255);

    fn options(loopback: bool) -> TransportOptions {
        TransportOptions {
            port: 9903,
            loopback,
        }
    }

    async fn joined(network: &MemoryNetwork, last: u8, loopback: bool) -> OpenedTransport {
        let opened = network
            .factory(Ipv4Addr::new(10, 0, 0, last))
            .open(options(loopback))
            .await
            .expect("open");
        opened.transport.join_multicast_group(GROUP).expect("join");
        opened
    }

    #[tokio::test]
    async fn test_multicast_reaches_other_members_but_not_sender() {
        // Arrange
        let network = MemoryNetwork::new();
        let mut a = joined(&network, 1, false).await;
        let mut b = joined(&network, 2, false).await;

        // Act
        a.transport
            .send(b"hello", SocketAddr::from((GROUP, 9903)))
            .await
            .unwrap();

        // Assert
        let got = b.inbound.try_recv().expect("b receives");
        assert_eq!(got.source, SocketAddr::from(([10, 0, 0, 1], 9903)));
        assert!(a.inbound.try_recv().is_err(), "no loopback");
    }

    #[tokio::test]
    async fn test_loopback_delivers_own_multicast() {
        let network = MemoryNetwork::new();
        let mut a = joined(&network, 1, true).await;

        a.transport
            .send(b"hello", SocketAddr::from((GROUP, 9903)))
            .await
            .unwrap();

        assert!(a.inbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_multicast_skips_non_members() {
        let network = MemoryNetwork::new();
        let a = joined(&network, 1, false).await;
        let mut outsider = network
            .factory(Ipv4Addr::new(10, 0, 0, 9))
            .open(options(false))
            .await
            .unwrap();

        a.transport
            .send(b"hello", SocketAddr::from((GROUP, 9903)))
            .await
            .unwrap();

        assert!(outsider.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unicast_reaches_only_the_addressed_endpoint() {
        let network = MemoryNetwork::new();
        let a = joined(&network, 1, false).await;
        let mut b = joined(&network, 2, false).await;
        let mut c = joined(&network, 3, false).await;

        a.transport
            .send(b"PONG", SocketAddr::from(([10, 0, 0, 2], 9903)))
            .await
            .unwrap();

        assert_eq!(b.inbound.try_recv().unwrap().data, b"PONG");
        assert!(c.inbound.try_recv().is_err());
        assert_eq!(network.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_second_bind_on_same_address_fails() {
        let network = MemoryNetwork::new();
        let factory = network.factory(Ipv4Addr::new(10, 0, 0, 1));
        let _first = factory.open(options(false)).await.unwrap();

        let second = factory.open(options(false)).await;

        assert!(matches!(second, Err(TransportError::Bind { port: 9903, .. })));
    }

    #[tokio::test]
    async fn test_close_releases_address_and_rejects_sends() {
        // Arrange
        let network = MemoryNetwork::new();
        let factory = network.factory(Ipv4Addr::new(10, 0, 0, 1));
        let opened = factory.open(options(false)).await.unwrap();

        // Act
        opened.transport.close();
        let send = opened
            .transport
            .send(b"x", SocketAddr::from((GROUP, 9903)))
            .await;

        // Assert
        assert!(matches!(send, Err(TransportError::Closed)));
        assert_eq!(network.endpoint_count(), 0);
        assert!(factory.open(options(false)).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_host_cannot_send() {
        let network = MemoryNetwork::new();
        let a = joined(&network, 1, false).await;
        network.fail_sends_from(Ipv4Addr::new(10, 0, 0, 1));

        let result = a
            .transport
            .send(b"x", SocketAddr::from((GROUP, 9903)))
            .await;

        assert!(matches!(result, Err(TransportError::Send { .. })));
        assert!(network.sent().is_empty());
    }
}
