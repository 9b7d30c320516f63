use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::BuildHasher;
use std::io;
use std::mem::size_of;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Instant;

use bitflags::bitflags;
use bytemuck::Pod;

use crate::buffer::ByteBuffer;

use super::config::HostConfig;
use super::host::{Host, HostError, PeerHandle, RawEvent, SendType, Traffic};
use super::peer::PeerStats;
use super::simulator::NetworkSimulator;
use super::tracking::{ReceiveWindow, ReliableWindow};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const FRAME_MAGIC: u16 = 0x534B;
pub const DATA_HEADER_SIZE: usize = 7;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const RELIABLE = 1 << 0;
        const UNSEQUENCED = 1 << 1;
    }
}

impl From<SendType> for FrameFlags {
    fn from(send_type: SendType) -> Self {
        match send_type {
            SendType::Reliable => FrameFlags::RELIABLE,
            SendType::Unsequenced => FrameFlags::UNSEQUENCED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Frame {
    Connect {
        connect_id: u32,
        channels: u8,
        data: u32,
    },
    Accept {
        connect_id: u32,
        channels: u8,
    },
    Refuse {
        connect_id: u32,
    },
    Disconnect {
        data: u32,
    },
    DisconnectAck,
    Data {
        flags: FrameFlags,
        channel: u8,
        sequence: u16,
        payload: Vec<u8>,
    },
    Ack {
        channel: u8,
        sequence: u16,
    },
    Ping {
        stamp: u32,
    },
    Pong {
        stamp: u32,
    },
}

impl Frame {
    const CONNECT: u8 = 1;
    const ACCEPT: u8 = 2;
    const REFUSE: u8 = 3;
    const DISCONNECT: u8 = 4;
    const DISCONNECT_ACK: u8 = 5;
    const DATA: u8 = 6;
    const ACK: u8 = 7;
    const PING: u8 = 8;
    const PONG: u8 = 9;

    fn encode(&self) -> Vec<u8> {
        let mut buffer = ByteBuffer::with_capacity(16);
        buffer.write(FRAME_MAGIC);

        match self {
            Frame::Connect {
                connect_id,
                channels,
                data,
            } => {
                buffer.write(Self::CONNECT);
                buffer.write(*connect_id);
                buffer.write(*channels);
                buffer.write(*data);
            }
            Frame::Accept {
                connect_id,
                channels,
            } => {
                buffer.write(Self::ACCEPT);
                buffer.write(*connect_id);
                buffer.write(*channels);
            }
            Frame::Refuse { connect_id } => {
                buffer.write(Self::REFUSE);
                buffer.write(*connect_id);
            }
            Frame::Disconnect { data } => {
                buffer.write(Self::DISCONNECT);
                buffer.write(*data);
            }
            Frame::DisconnectAck => {
                buffer.write(Self::DISCONNECT_ACK);
            }
            Frame::Data {
                flags,
                channel,
                sequence,
                payload,
            } => {
                buffer.write(Self::DATA);
                buffer.write(flags.bits());
                buffer.write(*channel);
                buffer.write(*sequence);
                buffer.write_bytes(payload);
            }
            Frame::Ack { channel, sequence } => {
                buffer.write(Self::ACK);
                buffer.write(*channel);
                buffer.write(*sequence);
            }
            Frame::Ping { stamp } => {
                buffer.write(Self::PING);
                buffer.write(*stamp);
            }
            Frame::Pong { stamp } => {
                buffer.write(Self::PONG);
                buffer.write(*stamp);
            }
        }

        buffer.into_bytes()
    }

    /// `None` for anything that is not a well-formed frame.
    fn decode(bytes: &[u8]) -> Option<Frame> {
        let mut buffer = ByteBuffer::from_slice(bytes);
        if take::<u16>(&mut buffer)? != FRAME_MAGIC {
            return None;
        }

        let frame = match take::<u8>(&mut buffer)? {
            Self::CONNECT => Frame::Connect {
                connect_id: take(&mut buffer)?,
                channels: take(&mut buffer)?,
                data: take(&mut buffer)?,
            },
            Self::ACCEPT => Frame::Accept {
                connect_id: take(&mut buffer)?,
                channels: take(&mut buffer)?,
            },
            Self::REFUSE => Frame::Refuse {
                connect_id: take(&mut buffer)?,
            },
            Self::DISCONNECT => Frame::Disconnect {
                data: take(&mut buffer)?,
            },
            Self::DISCONNECT_ACK => Frame::DisconnectAck,
            Self::DATA => {
                let flags = FrameFlags::from_bits(take(&mut buffer)?)?;
                let channel = take(&mut buffer)?;
                let sequence = take(&mut buffer)?;
                let length = buffer.remaining();
                Frame::Data {
                    flags,
                    channel,
                    sequence,
                    payload: buffer.read_bytes(length).to_vec(),
                }
            }
            Self::ACK => Frame::Ack {
                channel: take(&mut buffer)?,
                sequence: take(&mut buffer)?,
            },
            Self::PING => Frame::Ping {
                stamp: take(&mut buffer)?,
            },
            Self::PONG => Frame::Pong {
                stamp: take(&mut buffer)?,
            },
            _ => return None,
        };

        buffer.end().then_some(frame)
    }
}

fn take<T: Pod>(buffer: &mut ByteBuffer) -> Option<T> {
    (buffer.remaining() >= size_of::<T>()).then(|| buffer.read())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
struct Link {
    addr: SocketAddr,
    state: LinkState,
    connect_id: u32,
    connect_data: u32,
    channels: u8,
    /// When the current state was entered.
    since: Instant,
    last_attempt: Instant,
    last_receive: Instant,
    last_send: Instant,
    disconnect_data: u32,
    reliable: ReliableWindow,
    ordering: Vec<ReceiveWindow>,
    packets_sent: u32,
}

impl Link {
    fn new(
        addr: SocketAddr,
        state: LinkState,
        connect_id: u32,
        channels: u8,
        now: Instant,
    ) -> Self {
        Self {
            addr,
            state,
            connect_id,
            connect_data: 0,
            channels,
            since: now,
            last_attempt: now,
            last_receive: now,
            last_send: now,
            disconnect_data: 0,
            reliable: ReliableWindow::new(channels),
            ordering: (0..channels).map(|_| ReceiveWindow::new()).collect(),
            packets_sent: 0,
        }
    }

    fn stats(&self) -> PeerStats {
        PeerStats {
            round_trip_time: self.reliable.srtt().round() as u32,
            packets_sent: self.packets_sent,
            packets_lost: self.reliable.packets_lost(),
        }
    }

    /// Adopts the channel count the remote side accepted. It never grows.
    fn agree_channels(&mut self, channels: u8) {
        let channels = channels.clamp(1, self.channels);
        if channels != self.channels {
            self.channels = channels;
            self.reliable = ReliableWindow::new(channels);
            self.ordering.truncate(channels as usize);
        }
    }

    fn enter(&mut self, state: LinkState, now: Instant) {
        self.state = state;
        self.since = now;
        self.last_attempt = now;
    }
}

/// Reliable-UDP host over one non-blocking socket.
///
/// Handles the connect handshake, per-channel ordered reliable delivery with
/// acks and retransmission, unsequenced delivery, acknowledged disconnects,
/// keepalive pings and idle timeouts. All timers run on wall-clock time and
/// advance only when the host is serviced.
#[derive(Debug)]
pub struct UdpHost {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: HostConfig,
    channels: u8,
    peer_limit: usize,
    accepts_connections: bool,
    links: BTreeMap<PeerHandle, Link>,
    by_addr: HashMap<SocketAddr, PeerHandle>,
    retired: HashMap<PeerHandle, PeerStats>,
    next_handle: u32,
    events: VecDeque<RawEvent>,
    recv_buffer: Vec<u8>,
    traffic: Traffic,
    simulator: NetworkSimulator,
    epoch: Instant,
}

impl UdpHost {
    /// Outgoing-only host with a single connection slot on an ephemeral port.
    pub fn client(channels: u8, config: HostConfig) -> io::Result<Self> {
        Self::bind("0.0.0.0:0", 1, false, channels, config)
    }

    /// Accepts up to `max_peers` incoming connections on `port`.
    pub fn listen(
        port: u16,
        max_peers: usize,
        channels: u8,
        config: HostConfig,
    ) -> io::Result<Self> {
        Self::bind(("0.0.0.0", port), max_peers, true, channels, config)
    }

    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        peer_limit: usize,
        accepts_connections: bool,
        channels: u8,
        config: HostConfig,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;
        let simulator = NetworkSimulator::new(config.simulation.clone());

        Ok(Self {
            socket,
            local_addr,
            config,
            channels: channels.max(1),
            peer_limit,
            accepts_connections,
            links: BTreeMap::new(),
            by_addr: HashMap::new(),
            retired: HashMap::new(),
            next_handle: 1,
            events: VecDeque::new(),
            recv_buffer: vec![0; MAX_PACKET_SIZE],
            traffic: Traffic::default(),
            simulator,
            epoch: Instant::now(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    pub fn simulator(&self) -> &NetworkSimulator {
        &self.simulator
    }

    fn pump(&mut self) -> Result<(), HostError> {
        self.retired.clear();
        self.release_delayed(Instant::now());

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    self.traffic.received += size as u64;
                    if let Some(frame) = Frame::decode(&self.recv_buffer[..size]) {
                        self.handle_frame(addr, frame, Instant::now());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.check_timers(Instant::now());
        self.release_delayed(Instant::now());
        Ok(())
    }

    fn release_delayed(&mut self, now: Instant) {
        for (addr, bytes) in self.simulator.take_due(now) {
            if let Err(e) = self.socket.send_to(&bytes, addr) {
                log::debug!("Delayed send to {} failed: {}", addr, e);
            }
        }
    }

    fn handle_frame(&mut self, addr: SocketAddr, frame: Frame, now: Instant) {
        let handle = self.by_addr.get(&addr).copied();

        if let Frame::Connect {
            connect_id,
            channels,
            data,
        } = frame
        {
            self.accept_connection(addr, handle, connect_id, channels, data, now);
            return;
        }

        let Some(handle) = handle else {
            return;
        };
        let Some(link) = self.links.get_mut(&handle) else {
            return;
        };
        link.last_receive = now;

        match frame {
            Frame::Connect { .. } => {}
            Frame::Accept {
                connect_id,
                channels,
            } => {
                if link.state == LinkState::Connecting && link.connect_id == connect_id {
                    link.agree_channels(channels);
                    link.enter(LinkState::Connected, now);
                    log::debug!("Connected to {}", addr);
                    self.events.push_back(RawEvent::Connect {
                        peer: handle,
                        data: 0,
                    });
                }
            }
            Frame::Refuse { connect_id } => {
                if link.state == LinkState::Connecting && link.connect_id == connect_id {
                    log::debug!("Connection to {} refused", addr);
                    self.drop_link(handle, 0);
                }
            }
            Frame::Disconnect { data } => {
                self.transmit(addr, &Frame::DisconnectAck);
                self.drop_link(handle, data);
            }
            Frame::DisconnectAck => {
                if link.state == LinkState::Disconnecting {
                    let data = link.disconnect_data;
                    self.drop_link(handle, data);
                }
            }
            Frame::Data {
                flags,
                channel,
                sequence,
                payload,
            } => {
                if link.state == LinkState::Connecting || channel >= link.channels {
                    return;
                }

                if flags.contains(FrameFlags::RELIABLE) {
                    // Unacked frames come back later; acking a frame the window
                    // could not keep would lose it for good.
                    let receipt = link.ordering[channel as usize].accept(sequence, payload);
                    if receipt.should_ack() {
                        self.transmit(addr, &Frame::Ack { channel, sequence });
                    }
                    for packet in receipt.into_ready() {
                        self.events.push_back(RawEvent::Receive {
                            peer: handle,
                            channel,
                            packet,
                        });
                    }
                } else {
                    self.events.push_back(RawEvent::Receive {
                        peer: handle,
                        channel,
                        packet: payload,
                    });
                }
            }
            Frame::Ack { channel, sequence } => {
                link.reliable.acknowledge(channel, sequence, now);
            }
            Frame::Ping { stamp } => {
                self.transmit(addr, &Frame::Pong { stamp });
            }
            Frame::Pong { stamp } => {
                let elapsed = stamp_millis(self.epoch, now).wrapping_sub(stamp);
                link.reliable.update_rtt(elapsed as f32);
            }
        }
    }

    fn accept_connection(
        &mut self,
        addr: SocketAddr,
        existing: Option<PeerHandle>,
        connect_id: u32,
        channels: u8,
        data: u32,
        now: Instant,
    ) {
        if !self.accepts_connections {
            return;
        }

        if let Some(handle) = existing {
            let accepted = self
                .links
                .get(&handle)
                .filter(|link| link.connect_id == connect_id)
                .map(|link| link.channels);
            if let Some(channels) = accepted {
                self.transmit(
                    addr,
                    &Frame::Accept {
                        connect_id,
                        channels,
                    },
                );
                return;
            }
            // Same address, new attempt: the old connection is gone.
            self.drop_link(handle, 0);
        }

        if self.links.len() >= self.peer_limit {
            log::debug!("Refusing {}, all {} slots used", addr, self.peer_limit);
            self.transmit(addr, &Frame::Refuse { connect_id });
            return;
        }

        let channels = channels.clamp(1, self.channels);
        let handle = self.allocate();
        self.links.insert(
            handle,
            Link::new(addr, LinkState::Connected, connect_id, channels, now),
        );
        self.by_addr.insert(addr, handle);

        self.transmit(
            addr,
            &Frame::Accept {
                connect_id,
                channels,
            },
        );
        self.events.push_back(RawEvent::Connect { peer: handle, data });
    }

    fn check_timers(&mut self, now: Instant) {
        let mut expired = Vec::new();

        for (&handle, link) in self.links.iter_mut() {
            let in_state = now.duration_since(link.since);
            let since_attempt = now.duration_since(link.last_attempt);

            let frames = match link.state {
                LinkState::Connecting => {
                    if in_state >= self.config.connect_timeout() {
                        expired.push((handle, 0));
                        continue;
                    }
                    if since_attempt < self.config.connect_retry() {
                        continue;
                    }
                    link.last_attempt = now;
                    vec![Frame::Connect {
                        connect_id: link.connect_id,
                        channels: link.channels,
                        data: link.connect_data,
                    }
                    .encode()]
                }
                LinkState::Connected => {
                    if now.duration_since(link.last_receive) >= self.config.peer_timeout() {
                        log::debug!("{} timed out", link.addr);
                        expired.push((handle, 0));
                        continue;
                    }
                    let mut frames = link.reliable.take_resends(now, self.config.resend_min());
                    if frames.is_empty()
                        && now.duration_since(link.last_send) >= self.config.keepalive_interval()
                    {
                        let stamp = stamp_millis(self.epoch, now);
                        frames.push(Frame::Ping { stamp }.encode());
                    }
                    frames
                }
                LinkState::Disconnecting => {
                    if in_state >= self.config.disconnect_timeout() {
                        expired.push((handle, link.disconnect_data));
                        continue;
                    }
                    if since_attempt < self.config.connect_retry() {
                        continue;
                    }
                    link.last_attempt = now;
                    vec![Frame::Disconnect {
                        data: link.disconnect_data,
                    }
                    .encode()]
                }
            };

            for frame in frames {
                link.last_send = now;
                send_datagram(
                    &self.socket,
                    &mut self.traffic,
                    &mut self.simulator,
                    link.addr,
                    &frame,
                );
            }
        }

        for (handle, data) in expired {
            self.drop_link(handle, data);
        }
    }

    /// Forgets the connection and reports its disconnect.
    fn drop_link(&mut self, handle: PeerHandle, data: u32) {
        if let Some(link) = self.remove_link(handle) {
            log::debug!("Connection {} to {} closed ({})", handle, link.addr, data);
            self.events.push_back(RawEvent::Disconnect { peer: handle, data });
        }
    }

    fn remove_link(&mut self, handle: PeerHandle) -> Option<Link> {
        let link = self.links.remove(&handle)?;
        if self.by_addr.get(&link.addr) == Some(&handle) {
            self.by_addr.remove(&link.addr);
        }
        self.retired.insert(handle, link.stats());
        Some(link)
    }

    fn transmit(&mut self, addr: SocketAddr, frame: &Frame) {
        let bytes = frame.encode();
        if let Some(link) = self.by_addr.get(&addr).and_then(|h| self.links.get_mut(h)) {
            link.last_send = Instant::now();
        }
        send_datagram(
            &self.socket,
            &mut self.traffic,
            &mut self.simulator,
            addr,
            &bytes,
        );
    }

    fn allocate(&mut self) -> PeerHandle {
        let handle = PeerHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }
}

fn stamp_millis(epoch: Instant, now: Instant) -> u32 {
    now.duration_since(epoch).as_millis() as u32
}

/// With the simulator enabled the datagram is only queued; it counts as sent
/// either way.
fn send_datagram(
    socket: &UdpSocket,
    traffic: &mut Traffic,
    simulator: &mut NetworkSimulator,
    addr: SocketAddr,
    bytes: &[u8],
) -> bool {
    if simulator.is_enabled() {
        traffic.sent += bytes.len() as u64;
        simulator.enqueue(addr, bytes, Instant::now());
        return true;
    }

    match socket.send_to(bytes, addr) {
        Ok(sent) => {
            traffic.sent += sent as u64;
            true
        }
        Err(e) => {
            log::debug!("Send to {} failed: {}", addr, e);
            false
        }
    }
}

fn random_u32() -> u32 {
    RandomState::new().hash_one(Instant::now()) as u32
}

impl Host for UdpHost {
    fn service(&mut self) -> Result<Option<RawEvent>, HostError> {
        if self.events.is_empty() {
            self.pump()?;
        }
        Ok(self.events.pop_front())
    }

    fn connect(
        &mut self,
        addr: SocketAddr,
        channels: u8,
        data: u32,
    ) -> Result<PeerHandle, HostError> {
        // A new attempt replaces whatever is left of an earlier one.
        if let Some(previous) = self.by_addr.get(&addr).copied() {
            self.remove_link(previous);
        }

        if self.links.len() >= self.peer_limit {
            return Err(HostError::PeerLimit(self.peer_limit));
        }

        let now = Instant::now();
        let channels = channels.clamp(1, self.channels);
        let connect_id = random_u32();
        let handle = self.allocate();

        let mut link = Link::new(addr, LinkState::Connecting, connect_id, channels, now);
        link.connect_data = data;
        self.links.insert(handle, link);
        self.by_addr.insert(addr, handle);
        self.transmit(
            addr,
            &Frame::Connect {
                connect_id,
                channels,
                data,
            },
        );

        Ok(handle)
    }

    fn disconnect(&mut self, peer: PeerHandle, data: u32) {
        let Some(link) = self.links.get_mut(&peer) else {
            return;
        };

        match link.state {
            LinkState::Connecting => {
                let addr = link.addr;
                self.remove_link(peer);
                self.transmit(addr, &Frame::Disconnect { data });
            }
            LinkState::Connected => {
                let addr = link.addr;
                link.disconnect_data = data;
                link.enter(LinkState::Disconnecting, Instant::now());
                self.transmit(addr, &Frame::Disconnect { data });
            }
            LinkState::Disconnecting => {}
        }
    }

    fn send(
        &mut self,
        peer: PeerHandle,
        channel: u8,
        packet: &[u8],
        send_type: SendType,
    ) -> Result<(), HostError> {
        let link = self.links.get_mut(&peer).ok_or(HostError::UnknownPeer(peer))?;
        if link.state != LinkState::Connected {
            return Err(HostError::NotConnected(peer));
        }
        if channel >= link.channels {
            return Err(HostError::InvalidChannel {
                channel,
                count: link.channels,
            });
        }
        if packet.len() + DATA_HEADER_SIZE > MAX_PACKET_SIZE {
            return Err(HostError::PacketTooLarge(packet.len()));
        }

        let flags = FrameFlags::from(send_type);
        let sequence = if flags.contains(FrameFlags::RELIABLE) {
            link.reliable.next_sequence(channel)
        } else {
            0
        };

        let bytes = Frame::Data {
            flags,
            channel,
            sequence,
            payload: packet.to_vec(),
        }
        .encode();

        let now = Instant::now();
        if flags.contains(FrameFlags::RELIABLE) {
            link.reliable.track(channel, sequence, bytes.clone(), now);
        }
        link.packets_sent = link.packets_sent.wrapping_add(1);
        link.last_send = now;

        let addr = link.addr;
        let sent = send_datagram(
            &self.socket,
            &mut self.traffic,
            &mut self.simulator,
            addr,
            &bytes,
        );
        if !sent && !flags.contains(FrameFlags::RELIABLE) {
            return Err(HostError::Io(io::Error::other("datagram not sent")));
        }

        Ok(())
    }

    fn peer_stats(&self, peer: PeerHandle) -> Option<PeerStats> {
        self.links
            .get(&peer)
            .map(Link::stats)
            .or_else(|| self.retired.get(&peer).copied())
    }

    fn take_traffic(&mut self) -> Traffic {
        std::mem::take(&mut self.traffic)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn peer_limit(&self) -> usize {
        self.peer_limit
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn raw_peer() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        socket
    }

    /// Frames arriving at `socket` within `wait`, stopping early at `count`.
    fn frames_at(socket: &UdpSocket, count: usize, wait: Duration) -> Vec<Frame> {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let mut frames = Vec::new();
        let deadline = Instant::now() + wait;
        while frames.len() < count && Instant::now() < deadline {
            match socket.recv_from(&mut buf) {
                Ok((size, _)) => frames.extend(Frame::decode(&buf[..size])),
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
        frames
    }

    fn reliable(sequence: u16) -> Frame {
        Frame::Data {
            flags: FrameFlags::RELIABLE,
            channel: 0,
            sequence,
            payload: sequence.to_le_bytes().to_vec(),
        }
    }

    fn received(host: &mut UdpHost) -> Vec<u16> {
        host.events
            .drain(..)
            .filter_map(|event| match event {
                RawEvent::Receive { packet, .. } => {
                    Some(u16::from_le_bytes([packet[0], packet[1]]))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_frame_round_trip() {
        let frames = [
            Frame::Connect {
                connect_id: 77,
                channels: 2,
                data: 9,
            },
            Frame::Accept {
                connect_id: 77,
                channels: 1,
            },
            Frame::Refuse { connect_id: 77 },
            Frame::DisconnectAck,
            Frame::Data {
                flags: FrameFlags::RELIABLE,
                channel: 1,
                sequence: 65535,
                payload: vec![1, 2, 3],
            },
            Frame::Ack {
                channel: 1,
                sequence: 4,
            },
        ];

        for frame in frames {
            assert_eq!(Frame::decode(&frame.encode()), Some(frame));
        }
    }

    #[test]
    fn test_data_header_size() {
        let bytes = Frame::Data {
            flags: FrameFlags::UNSEQUENCED,
            channel: 0,
            sequence: 0,
            payload: Vec::new(),
        }
        .encode();
        assert_eq!(bytes.len(), DATA_HEADER_SIZE);
    }

    #[test]
    fn test_rejects_malformed_frames() {
        assert_eq!(Frame::decode(&[]), None);
        assert_eq!(Frame::decode(&[0x00, 0x00, Frame::PING, 0, 0, 0, 0]), None);

        let mut ping = Frame::Ping { stamp: 5 }.encode();
        ping.pop();
        assert_eq!(Frame::decode(&ping), None);

        let mut trailing = Frame::DisconnectAck.encode();
        trailing.push(0);
        assert_eq!(Frame::decode(&trailing), None);

        let mut unknown = Frame::DisconnectAck.encode();
        unknown[2] = 200;
        assert_eq!(Frame::decode(&unknown), None);
    }

    #[test]
    fn test_send_requires_connection() {
        let mut host = UdpHost::client(2, HostConfig::default()).unwrap();
        assert!(matches!(
            host.send(PeerHandle(9), 0, &[1], SendType::Reliable),
            Err(HostError::UnknownPeer(_))
        ));

        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let handle = host.connect(target, 2, 0).unwrap();
        assert!(matches!(
            host.send(handle, 0, &[1], SendType::Reliable),
            Err(HostError::NotConnected(_))
        ));
        let other: SocketAddr = "127.0.0.1:10".parse().unwrap();
        assert!(matches!(
            host.connect(other, 2, 0),
            Err(HostError::PeerLimit(1))
        ));
    }

    #[test]
    fn test_disconnect_while_connecting_is_silent() {
        let mut host = UdpHost::client(2, HostConfig::default()).unwrap();
        let target: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let handle = host.connect(target, 2, 0).unwrap();

        host.disconnect(handle, 0);
        assert_eq!(host.connection_count(), 0);
        assert!(host.events.is_empty());
    }

    #[test]
    fn test_frame_past_hold_limit_is_not_acked() {
        let mut host = UdpHost::bind("127.0.0.1:0", 4, true, 2, HostConfig::default()).unwrap();
        let remote = raw_peer();
        let addr = remote.local_addr().unwrap();
        let now = Instant::now();

        host.handle_frame(
            addr,
            Frame::Connect {
                connect_id: 5,
                channels: 2,
                data: 0,
            },
            now,
        );
        assert_eq!(
            frames_at(&remote, 1, Duration::from_secs(1)),
            vec![Frame::Accept {
                connect_id: 5,
                channels: 2
            }]
        );
        host.events.clear();

        // Sequence 0 goes missing, so everything after it is held.
        for sequence in 1..=512 {
            host.handle_frame(addr, reliable(sequence), now);
            assert_eq!(
                frames_at(&remote, 1, Duration::from_secs(1)),
                vec![Frame::Ack {
                    channel: 0,
                    sequence
                }]
            );
        }
        host.handle_frame(addr, reliable(513), now);
        assert!(frames_at(&remote, 1, Duration::from_millis(50)).is_empty());
        assert!(received(&mut host).is_empty());

        host.handle_frame(addr, reliable(0), now);
        assert_eq!(frames_at(&remote, 1, Duration::from_secs(1)).len(), 1);
        assert_eq!(received(&mut host), (0..=512).collect::<Vec<_>>());

        // The sender never saw an ack for 513 and resends it.
        host.handle_frame(addr, reliable(513), now);
        assert_eq!(
            frames_at(&remote, 1, Duration::from_secs(1)),
            vec![Frame::Ack {
                channel: 0,
                sequence: 513
            }]
        );
        assert_eq!(received(&mut host), vec![513]);
    }

    #[test]
    fn test_accept_carries_clamped_channels() {
        let mut host = UdpHost::bind("127.0.0.1:0", 4, true, 1, HostConfig::default()).unwrap();
        let remote = raw_peer();
        let addr = remote.local_addr().unwrap();

        host.handle_frame(
            addr,
            Frame::Connect {
                connect_id: 9,
                channels: 4,
                data: 0,
            },
            Instant::now(),
        );
        assert_eq!(
            frames_at(&remote, 1, Duration::from_secs(1)),
            vec![Frame::Accept {
                connect_id: 9,
                channels: 1
            }]
        );
    }

    #[test]
    fn test_connect_adopts_accepted_channels() {
        let mut host = UdpHost::client(2, HostConfig::default()).unwrap();
        let remote = raw_peer();
        let addr = remote.local_addr().unwrap();
        let handle = host.connect(addr, 2, 0).unwrap();

        let frames = frames_at(&remote, 1, Duration::from_secs(1));
        let Some(Frame::Connect { connect_id, .. }) = frames.first().cloned() else {
            panic!("expected a connect frame, got {:?}", frames);
        };
        host.handle_frame(
            addr,
            Frame::Accept {
                connect_id,
                channels: 1,
            },
            Instant::now(),
        );
        assert!(matches!(
            host.events.pop_front(),
            Some(RawEvent::Connect { .. })
        ));

        assert!(matches!(
            host.send(handle, 1, &[1], SendType::Reliable),
            Err(HostError::InvalidChannel {
                channel: 1,
                count: 1
            })
        ));
        host.send(handle, 0, &[1], SendType::Reliable).unwrap();
        assert!(matches!(
            frames_at(&remote, 1, Duration::from_secs(1)).first(),
            Some(Frame::Data { channel: 0, .. })
        ));
    }
}
