use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use super::host::{Host, HostError, PeerHandle, RawEvent, SendType, Traffic};
use super::peer::PeerStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub peer: PeerHandle,
    pub channel: u8,
    pub packet: Vec<u8>,
    pub send_type: SendType,
}

#[derive(Debug, Default)]
struct Link {
    connected: bool,
    stats: PeerStats,
}

/// In-memory host driven by the caller. Incoming activity is injected and
/// shows up on the next `service`; outgoing activity is recorded.
#[derive(Debug)]
pub struct ScriptedHost {
    pending: VecDeque<RawEvent>,
    links: HashMap<PeerHandle, Link>,
    next_handle: u32,
    peer_limit: usize,
    refuse_connects: bool,
    connect_requests: Vec<(PeerHandle, SocketAddr)>,
    disconnect_requests: Vec<(PeerHandle, u32)>,
    sent: Vec<SentPacket>,
    traffic: Traffic,
}

impl ScriptedHost {
    pub fn new(peer_limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            links: HashMap::new(),
            next_handle: 1,
            peer_limit,
            refuse_connects: false,
            connect_requests: Vec::new(),
            disconnect_requests: Vec::new(),
            sent: Vec::new(),
            traffic: Traffic::default(),
        }
    }

    /// Makes subsequent outgoing `connect` calls fail.
    pub fn refuse_connects(&mut self, refuse: bool) {
        self.refuse_connects = refuse;
    }

    /// A remote peer connects to us. `None` when every slot is taken.
    pub fn inject_connect(&mut self, data: u32) -> Option<PeerHandle> {
        if self.connected_count() >= self.peer_limit {
            return None;
        }

        let handle = self.allocate();
        self.links.insert(
            handle,
            Link {
                connected: true,
                stats: PeerStats::default(),
            },
        );
        self.pending.push_back(RawEvent::Connect { peer: handle, data });
        Some(handle)
    }

    /// The remote side accepted a connection we started.
    pub fn complete_connect(&mut self, peer: PeerHandle, data: u32) {
        if let Some(link) = self.links.get_mut(&peer) {
            link.connected = true;
        }
        self.pending.push_back(RawEvent::Connect { peer, data });
    }

    pub fn inject_disconnect(&mut self, peer: PeerHandle, data: u32) {
        if let Some(link) = self.links.get_mut(&peer) {
            link.connected = false;
        }
        self.pending.push_back(RawEvent::Disconnect { peer, data });
    }

    pub fn inject_packet(&mut self, peer: PeerHandle, channel: u8, packet: Vec<u8>) {
        self.traffic.received += packet.len() as u64;
        self.pending.push_back(RawEvent::Receive {
            peer,
            channel,
            packet,
        });
    }

    pub fn set_stats(&mut self, peer: PeerHandle, stats: PeerStats) {
        self.links.entry(peer).or_default().stats = stats;
    }

    pub fn sent(&self) -> &[SentPacket] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<SentPacket> {
        std::mem::take(&mut self.sent)
    }

    pub fn connect_requests(&self) -> &[(PeerHandle, SocketAddr)] {
        &self.connect_requests
    }

    pub fn disconnect_requests(&self) -> &[(PeerHandle, u32)] {
        &self.disconnect_requests
    }

    fn connected_count(&self) -> usize {
        self.links.values().filter(|l| l.connected).count()
    }

    fn allocate(&mut self) -> PeerHandle {
        let handle = PeerHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

impl Host for ScriptedHost {
    fn service(&mut self) -> Result<Option<RawEvent>, HostError> {
        Ok(self.pending.pop_front())
    }

    fn connect(
        &mut self,
        addr: SocketAddr,
        _channels: u8,
        _data: u32,
    ) -> Result<PeerHandle, HostError> {
        if self.refuse_connects || self.connected_count() >= self.peer_limit {
            return Err(HostError::PeerLimit(self.peer_limit));
        }

        let handle = self.allocate();
        self.links.insert(handle, Link::default());
        self.connect_requests.push((handle, addr));
        Ok(handle)
    }

    fn disconnect(&mut self, peer: PeerHandle, data: u32) {
        self.disconnect_requests.push((peer, data));
    }

    fn send(
        &mut self,
        peer: PeerHandle,
        channel: u8,
        packet: &[u8],
        send_type: SendType,
    ) -> Result<(), HostError> {
        if !self.links.get(&peer).is_some_and(|l| l.connected) {
            return Err(HostError::NotConnected(peer));
        }

        self.traffic.sent += packet.len() as u64;
        self.sent.push(SentPacket {
            peer,
            channel,
            packet: packet.to_vec(),
            send_type,
        });
        Ok(())
    }

    fn peer_stats(&self, peer: PeerHandle) -> Option<PeerStats> {
        self.links.get(&peer).map(|l| l.stats)
    }

    fn take_traffic(&mut self) -> Traffic {
        std::mem::take(&mut self.traffic)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_limit(&self) -> usize {
        self.peer_limit
    }
}
