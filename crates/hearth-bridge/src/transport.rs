//! Dual-port UDP transport.
//!
//! Matter commissioning and operational traffic arrive on different
//! ports (5550 and 5540 by default), each bound on IPv4 and IPv6.
//! Receive tasks feed a fixed-depth ring; when the ring is full the
//! incoming packet is dropped with a warning - queued packets are never
//! overwritten. The coordinator polls the ring non-blockingly (or
//! awaits the next packet), so the protocol loop owns its own pacing.
//!
//! Peer addresses are carried in the canonical 16-byte form with IPv4
//! mapped (`::ffff:a.b.c.d`), so one representation flows through the
//! stack regardless of which socket the packet arrived on.

use std::{
    collections::VecDeque,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{net::UdpSocket, sync::Notify, task::JoinHandle};

use hearth_proto::MAX_MESSAGE_SIZE;

use crate::error::BridgeError;

/// Default operational port.
pub const OPERATIONAL_PORT: u16 = 5540;

/// Default commissioning port.
pub const COMMISSIONING_PORT: u16 = 5550;

/// Fixed receive ring depth.
pub const RX_QUEUE_DEPTH: usize = 4;

/// Which listening port a packet arrived on (or a send leaves from).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Operational traffic (5540)
    Operational,
    /// Commissioning traffic (5550)
    Commissioning,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Operational port (0 = ephemeral, for tests)
    pub operational_port: u16,
    /// Commissioning port (0 = ephemeral, for tests)
    pub commissioning_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { operational_port: OPERATIONAL_PORT, commissioning_port: COMMISSIONING_PORT }
    }
}

/// One received datagram.
#[derive(Debug, Clone)]
pub struct RxPacket {
    /// Datagram contents (at most [`MAX_MESSAGE_SIZE`] bytes)
    pub data: Vec<u8>,
    /// Peer address, canonical 16-byte form (IPv4 mapped)
    pub peer_ip: [u8; 16],
    /// Peer UDP port
    pub peer_port: u16,
    /// Port the packet arrived on
    pub port: PortKind,
}

impl RxPacket {
    /// Peer as a socket address for replying.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        from_canonical(&self.peer_ip, self.peer_port)
    }
}

struct RxQueue {
    packets: Mutex<VecDeque<RxPacket>>,
    notify: Notify,
}

impl RxQueue {
    fn push(&self, packet: RxPacket) {
        {
            let mut packets =
                self.packets.lock().unwrap_or_else(PoisonError::into_inner);
            if packets.len() >= RX_QUEUE_DEPTH {
                tracing::warn!(
                    port = ?packet.port,
                    len = packet.data.len(),
                    "receive queue full, dropping packet"
                );
                return;
            }
            packets.push_back(packet);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<RxPacket> {
        self.packets.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

struct BoundSocket {
    socket: Arc<UdpSocket>,
    kind: PortKind,
    is_v6: bool,
}

/// Dual-port, dual-stack UDP transport.
pub struct UdpTransport {
    sockets: Vec<BoundSocket>,
    queue: Arc<RxQueue>,
    tasks: Vec<JoinHandle<()>>,
    operational_port: u16,
    commissioning_port: u16,
}

impl UdpTransport {
    /// Bind both ports on IPv4 and (where available) IPv6 and start
    /// the receive tasks.
    ///
    /// IPv4 binds are required; a missing IPv6 stack degrades to
    /// IPv4-only with a warning.
    pub async fn bind(config: &TransportConfig) -> Result<Self, BridgeError> {
        let queue = Arc::new(RxQueue { packets: Mutex::new(VecDeque::new()), notify: Notify::new() });
        let mut sockets = Vec::new();

        let operational_port =
            bind_pair(&mut sockets, PortKind::Operational, config.operational_port).await?;
        let commissioning_port =
            bind_pair(&mut sockets, PortKind::Commissioning, config.commissioning_port).await?;

        let tasks = sockets
            .iter()
            .map(|bound| {
                tokio::spawn(receive_loop(
                    Arc::clone(&bound.socket),
                    bound.kind,
                    Arc::clone(&queue),
                ))
            })
            .collect();

        tracing::info!(operational_port, commissioning_port, "udp transport bound");
        Ok(Self { sockets, queue, tasks, operational_port, commissioning_port })
    }

    /// Actual operational port (after ephemeral resolution).
    #[must_use]
    pub fn operational_port(&self) -> u16 {
        self.operational_port
    }

    /// Actual commissioning port (after ephemeral resolution).
    #[must_use]
    pub fn commissioning_port(&self) -> u16 {
        self.commissioning_port
    }

    /// Non-blocking poll of the receive ring.
    #[must_use]
    pub fn poll_receive(&self) -> Option<RxPacket> {
        self.queue.pop()
    }

    /// Await the next packet.
    pub async fn receive(&self) -> RxPacket {
        loop {
            if let Some(packet) = self.queue.pop() {
                return packet;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Best-effort send from the socket matching the port kind and the
    /// target's address family.
    pub async fn send(
        &self,
        target: SocketAddr,
        data: &[u8],
        kind: PortKind,
    ) -> Result<(), BridgeError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(BridgeError::Send(format!(
                "datagram of {} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit",
                data.len()
            )));
        }
        let want_v6 = target.is_ipv6();
        let bound = self
            .sockets
            .iter()
            .find(|s| s.kind == kind && s.is_v6 == want_v6)
            .ok_or_else(|| {
                BridgeError::Send(format!("no {kind:?} socket for target {target}"))
            })?;
        bound
            .socket
            .send_to(data, target)
            .await
            .map_err(|e| BridgeError::Send(e.to_string()))?;
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn bind_pair(
    sockets: &mut Vec<BoundSocket>,
    kind: PortKind,
    port: u16,
) -> Result<u16, BridgeError> {
    let v4 = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await.map_err(|e| {
        BridgeError::Config(format!("failed to bind {kind:?} port {port} on IPv4: {e}"))
    })?;
    let bound_port = v4.local_addr()?.port();
    sockets.push(BoundSocket { socket: Arc::new(v4), kind, is_v6: false });

    match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, bound_port)).await {
        Ok(v6) => sockets.push(BoundSocket { socket: Arc::new(v6), kind, is_v6: true }),
        Err(e) => {
            tracing::warn!(?kind, port = bound_port, error = %e, "IPv6 bind failed, IPv4 only");
        },
    }
    Ok(bound_port)
}

async fn receive_loop(socket: Arc<UdpSocket>, kind: PortKind, queue: Arc<RxQueue>) {
    // One extra byte so an oversized datagram is detectable instead of
    // silently truncated.
    let mut buf = [0u8; MAX_MESSAGE_SIZE + 1];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                if len > MAX_MESSAGE_SIZE {
                    tracing::warn!(?kind, %peer, len, "dropping oversized datagram");
                    continue;
                }
                let (peer_ip, peer_port) = canonical_bytes(&peer);
                queue.push(RxPacket { data: buf[..len].to_vec(), peer_ip, peer_port, port: kind });
            },
            Err(e) => {
                tracing::warn!(?kind, error = %e, "udp receive error");
            },
        }
    }
}

/// Convert a socket address to the canonical 16-byte + port form
/// (IPv4 becomes the mapped `::ffff:a.b.c.d`).
#[must_use]
pub fn canonical_bytes(addr: &SocketAddr) -> ([u8; 16], u16) {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    };
    (ip.octets(), addr.port())
}

/// Rebuild a socket address from the canonical form; mapped IPv4 comes
/// back as a plain IPv4 address.
#[must_use]
pub fn from_canonical(ip: &[u8; 16], port: u16) -> SocketAddr {
    SocketAddr::new(Ipv6Addr::from(*ip).to_canonical(), port)
}

/// Parse an address literal (IPv4 dotted or IPv6) with a port.
pub fn parse_addr(text: &str, port: u16) -> Result<SocketAddr, BridgeError> {
    text.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, port))
        .map_err(|e| BridgeError::Config(format!("invalid address '{text}': {e}")))
}
