use std::net::{SocketAddr, ToSocketAddrs};

use crate::buffer::ByteBuffer;

use super::config::TransportConfig;
use super::error::TransportError;
use super::event::NetworkEvent;
use super::host::{Host, RawEvent, SendType};
use super::peer::{Peer, PeerId, PeerStats};
use super::system;
use super::transport::{EventHandler, Transport, bind_ping_socket};
use super::udp::UdpHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug)]
struct ClientSession {
    state: ClientState,
    peer: Peer,
}

impl<H: Host> EventHandler<H> for ClientSession {
    fn handle_event(&mut self, host: &H, time: f64, raw: RawEvent) -> NetworkEvent {
        match raw {
            RawEvent::Connect { data, .. } => {
                self.state = ClientState::Connected;
                NetworkEvent::connect(time, data)
            }
            RawEvent::Disconnect { peer, data } => {
                if let Some(stats) = host.peer_stats(peer) {
                    self.peer.record_stats(stats);
                }
                // A late disconnect for an abandoned attempt leaves a newer
                // connection alone.
                if self.peer.handle().is_none_or(|handle| handle == peer) {
                    self.peer.release();
                    self.state = ClientState::Disconnected;
                }
                NetworkEvent::disconnect(time, data)
            }
            RawEvent::Receive {
                channel, packet, ..
            } => NetworkEvent::packet(time, channel, ByteBuffer::from_bytes(packet)),
        }
    }
}

/// Single-connection transport.
#[derive(Debug)]
pub struct ClientTransport<H: Host = UdpHost> {
    transport: Transport<H>,
    session: ClientSession,
    channel_count: u8,
}

impl ClientTransport<UdpHost> {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        system::ensure_initialized()?;

        let host = UdpHost::client(config.channel_count, config.host.clone())?;
        let mut client = Self::with_host(host, config)?;

        match bind_ping_socket(0, true) {
            Ok(socket) => client.transport.set_ping_socket(socket),
            Err(e) => log::warn!("Could not create ping socket: {}", e),
        }

        Ok(client)
    }
}

impl<H: Host> ClientTransport<H> {
    pub fn with_host(host: H, config: TransportConfig) -> Result<Self, TransportError> {
        system::ensure_initialized()?;

        Ok(Self {
            transport: Transport::new(Some(host), &config),
            session: ClientSession {
                state: ClientState::Disconnected,
                peer: Peer::new(PeerId(0), None),
            },
            channel_count: config.channel_count,
        })
    }

    pub fn update(&mut self, frame_time: f64) {
        self.transport.update_with(frame_time, &mut self.session);
    }

    pub fn get_network_event(&mut self) -> Option<NetworkEvent> {
        self.transport.get_network_event()
    }

    pub fn transport(&self) -> &Transport<H> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<H> {
        &mut self.transport
    }

    pub fn host_mut(&mut self) -> Option<&mut H> {
        self.transport.host_mut()
    }

    pub fn set_fake_lag(&mut self, value: f64) {
        self.transport.set_fake_lag(value);
    }

    pub fn state(&self) -> ClientState {
        self.session.state
    }

    pub fn can_connect(&self) -> bool {
        self.session.state == ClientState::Disconnected
    }

    pub fn is_connected(&self) -> bool {
        self.session.state == ClientState::Connected
    }

    pub fn is_disconnected(&self) -> bool {
        self.session.state == ClientState::Disconnected
    }

    pub fn peer(&self) -> &Peer {
        &self.session.peer
    }

    /// Resolves `address` and starts connecting. Ignored unless disconnected.
    pub fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        if !self.can_connect() {
            log::debug!("Connect to {}:{} ignored in state {:?}", address, port, self.state());
            return Ok(());
        }

        let addr = (address, port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(format!("{}:{}", address, port)))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| TransportError::Resolve(format!("{}:{}", address, port)))?;

        self.connect_addr(addr)
    }

    pub fn connect_addr(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if !self.can_connect() {
            log::debug!("Connect to {} ignored in state {:?}", addr, self.state());
            return Ok(());
        }

        let channels = self.channel_count;
        let host = self
            .transport
            .host_mut()
            .ok_or(TransportError::NoConnection)?;
        let handle = host.connect(addr, channels, 0)?;

        log::info!("Connecting to {}", addr);
        self.session.peer.bind(handle);
        self.session.state = ClientState::Connecting;

        Ok(())
    }

    /// Asks the server to close the connection. With `force` the client stops
    /// waiting for the acknowledgment and is disconnected immediately.
    pub fn disconnect(&mut self, force: bool, data: u32) {
        if !self.is_connected() && !force {
            return;
        }

        if let (Some(handle), Some(host)) = (self.session.peer.handle(), self.transport.host_mut())
        {
            host.disconnect(handle, data);
        }

        self.session.state = if force {
            ClientState::Disconnected
        } else {
            ClientState::Disconnecting
        };
    }

    pub fn send_packet(&mut self, buffer: &ByteBuffer, send_type: SendType, channel: u8) {
        let Some(handle) = self.session.peer.handle() else {
            log::debug!("Dropping packet, not connected");
            return;
        };
        let Some(host) = self.transport.host_mut() else {
            return;
        };

        if let Err(e) = host.send(handle, channel, buffer.as_bytes(), send_type) {
            log::debug!("Dropping packet: {}", e);
        }
    }

    pub fn rtt(&self) -> u32 {
        self.live_stats().map_or(0, |s| s.round_trip_time)
    }

    pub fn packets_sent(&self) -> u32 {
        self.live_stats().map_or(0, |s| s.packets_sent)
    }

    pub fn packets_lost(&self) -> u32 {
        self.live_stats().map_or(0, |s| s.packets_lost)
    }

    fn live_stats(&self) -> Option<PeerStats> {
        let handle = self.session.peer.handle()?;
        self.transport.host()?.peer_stats(handle)
    }
}
