use std::fmt;
use std::io;
use std::net::SocketAddr;

use super::peer::PeerStats;

/// Index into a host's connection table. Only meaningful to the host that
/// issued it, and only while that connection exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub u32);

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendType {
    /// Delivered once, in order within its channel.
    Reliable,
    /// Fire and forget, no ordering.
    Unsequenced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Connect { peer: PeerHandle, data: u32 },
    Disconnect { peer: PeerHandle, data: u32 },
    Receive { peer: PeerHandle, channel: u8, packet: Vec<u8> },
}

impl RawEvent {
    pub fn peer(&self) -> PeerHandle {
        match self {
            RawEvent::Connect { peer, .. }
            | RawEvent::Disconnect { peer, .. }
            | RawEvent::Receive { peer, .. } => *peer,
        }
    }
}

/// Bytes moved since the counters were last taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    pub sent: u64,
    pub received: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),
    #[error("peer {0} is not connected")]
    NotConnected(PeerHandle),
    #[error("no free peer slots (limit {0})")]
    PeerLimit(usize),
    #[error("channel {channel} out of range ({count} channels)")]
    InvalidChannel { channel: u8, count: u8 },
    #[error("packet of {0} bytes exceeds the datagram limit")]
    PacketTooLarge(usize),
}

/// The connection primitive a transport sits on: connection establishment,
/// per-channel reliability and per-peer statistics.
pub trait Host {
    /// Returns the next pending event without blocking.
    fn service(&mut self) -> Result<Option<RawEvent>, HostError>;

    /// Starts connecting to `addr`. The matching `Connect` or `Disconnect`
    /// event arrives through [`Host::service`].
    fn connect(
        &mut self,
        addr: SocketAddr,
        channels: u8,
        data: u32,
    ) -> Result<PeerHandle, HostError>;

    /// Requests a graceful disconnect. The peer's `Disconnect` event follows
    /// once the remote side acknowledges or the request times out.
    fn disconnect(&mut self, peer: PeerHandle, data: u32);

    fn send(
        &mut self,
        peer: PeerHandle,
        channel: u8,
        packet: &[u8],
        send_type: SendType,
    ) -> Result<(), HostError>;

    fn peer_stats(&self, peer: PeerHandle) -> Option<PeerStats>;

    /// Returns the byte counters and zeroes them.
    fn take_traffic(&mut self) -> Traffic;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_limit(&self) -> usize;
}
