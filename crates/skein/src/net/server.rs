use std::collections::HashMap;

use crate::buffer::ByteBuffer;

use super::config::TransportConfig;
use super::error::TransportError;
use super::event::NetworkEvent;
use super::host::{Host, PeerHandle, RawEvent, SendType};
use super::peer::{Peer, PeerId};
use super::system;
use super::transport::{EventHandler, Transport, bind_ping_socket};
use super::udp::UdpHost;

/// Connected peers in arrival order, plus the host handle lookup.
#[derive(Debug, Default)]
struct PeerTable {
    peers: Vec<Peer>,
    by_handle: HashMap<PeerHandle, PeerId>,
    next_id: u32,
}

impl PeerTable {
    fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id() == id)
    }

    fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.id() == id)
    }

    fn insert(&mut self, handle: PeerHandle) -> PeerId {
        let id = PeerId(self.next_id);
        self.next_id += 1;

        self.peers.push(Peer::new(id, Some(handle)));
        self.by_handle.insert(handle, id);
        id
    }

    fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let index = self.peers.iter().position(|p| p.id() == id)?;
        let peer = self.peers.remove(index);
        if let Some(handle) = peer.handle() {
            self.by_handle.remove(&handle);
        }
        Some(peer)
    }

    fn clear(&mut self) -> usize {
        let count = self.peers.len();
        self.peers.clear();
        self.by_handle.clear();
        count
    }

    fn refresh_stats<H: Host>(&mut self, host: &H) {
        for peer in &mut self.peers {
            if let Some(stats) = peer.handle().and_then(|h| host.peer_stats(h)) {
                peer.record_stats(stats);
            }
        }
    }
}

impl<H: Host> EventHandler<H> for PeerTable {
    fn handle_event(&mut self, host: &H, time: f64, raw: RawEvent) -> NetworkEvent {
        match raw {
            RawEvent::Connect { peer, data } => {
                let id = self.insert(peer);
                log::debug!("{} connected as {}", peer, id);
                NetworkEvent::connect(time, data).with_peer(Some(id))
            }
            RawEvent::Disconnect { peer, data } => {
                let id = self.by_handle.remove(&peer);
                if let Some(entry) = id.and_then(|id| self.get_mut(id)) {
                    if let Some(stats) = host.peer_stats(peer) {
                        entry.record_stats(stats);
                    }
                    entry.release();
                }
                NetworkEvent::disconnect(time, data).with_peer(id)
            }
            RawEvent::Receive {
                peer,
                channel,
                packet,
            } => {
                let id = self.by_handle.get(&peer).copied();
                NetworkEvent::packet(time, channel, ByteBuffer::from_bytes(packet)).with_peer(id)
            }
        }
    }
}

/// Multi-peer transport listening on a fixed port.
///
/// Peers are created when their connect event is polled and stay in the
/// collection after disconnecting until [`ServerTransport::delete_peer`], so
/// their final statistics remain readable. Events name peers by [`PeerId`];
/// an id whose peer was deleted resolves to `None`.
#[derive(Debug)]
pub struct ServerTransport<H: Host = UdpHost> {
    transport: Transport<H>,
    peers: PeerTable,
}

impl ServerTransport<UdpHost> {
    /// A listener that cannot be created yields a transport without a
    /// connection; check [`ServerTransport::has_connection`].
    pub fn bind(
        max_peers: usize,
        port: u16,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        system::ensure_initialized()?;

        let listener = UdpHost::listen(port, max_peers, config.channel_count, config.host.clone());
        let host = match listener {
            Ok(host) => Some(host),
            Err(e) => {
                log::warn!("Could not listen on port {}: {}", port, e);
                None
            }
        };

        Ok(Self::from_parts(host, config))
    }
}

impl<H: Host> ServerTransport<H> {
    pub fn with_host(host: H, config: TransportConfig) -> Result<Self, TransportError> {
        system::ensure_initialized()?;
        Ok(Self::from_parts(Some(host), config))
    }

    fn from_parts(host: Option<H>, config: TransportConfig) -> Self {
        Self {
            transport: Transport::new(host, &config),
            peers: PeerTable::default(),
        }
    }

    pub fn update(&mut self, frame_time: f64) {
        self.transport.update_with(frame_time, &mut self.peers);
        if let Some(host) = self.transport.host() {
            self.peers.refresh_stats(host);
        }
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

    pub fn has_connection(&self) -> bool {
        self.transport.has_connection()
    }

    pub fn set_fake_lag(&mut self, value: f64) {
        self.transport.set_fake_lag(value);
    }

    /// Binds the discovery socket. Failure leaves the server without one.
    pub fn create_ping_socket(&mut self, port: u16) -> Result<(), TransportError> {
        let socket = bind_ping_socket(port, false)?;
        self.transport.set_ping_socket(socket);
        Ok(())
    }

    pub fn listen_port(&self) -> u16 {
        self.transport
            .host()
            .and_then(|h| h.local_addr())
            .map_or(0, |addr| addr.port())
    }

    pub fn max_peers(&self) -> usize {
        self.transport.host().map_or(0, |h| h.peer_limit())
    }

    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.peers.iter()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.peers.len()
    }

    /// Removes the peer from the collection and hands it back.
    pub fn delete_peer(&mut self, id: PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn clear_peers(&mut self) -> usize {
        self.peers.clear()
    }

    pub fn disconnect_peer(&mut self, id: PeerId, data: u32) {
        let Some(handle) = self.peers.get(id).and_then(Peer::handle) else {
            return;
        };
        if let Some(host) = self.transport.host_mut() {
            host.disconnect(handle, data);
        }
    }

    pub fn disconnect_all(&mut self, data: u32) {
        let Some(host) = self.transport.host_mut() else {
            return;
        };
        for handle in self.peers.peers.iter().filter_map(Peer::handle) {
            host.disconnect(handle, data);
        }
    }

    pub fn send_packet(
        &mut self,
        buffer: &ByteBuffer,
        id: PeerId,
        send_type: SendType,
        channel: u8,
    ) {
        let Some(handle) = self.peers.get(id).and_then(Peer::handle) else {
            return;
        };
        let Some(host) = self.transport.host_mut() else {
            return;
        };

        if let Err(e) = host.send(handle, channel, buffer.as_bytes(), send_type) {
            log::debug!("Dropping packet for {}: {}", id, e);
        }
    }

    /// Sends to every peer with an attached object, except `except`.
    pub fn broadcast_packet(
        &mut self,
        buffer: &ByteBuffer,
        except: Option<PeerId>,
        send_type: SendType,
        channel: u8,
    ) {
        let Some(host) = self.transport.host_mut() else {
            return;
        };

        let targets = self
            .peers
            .peers
            .iter()
            .filter(|p| Some(p.id()) != except && p.has_object())
            .filter_map(|p| p.handle().map(|h| (p.id(), h)));

        for (id, handle) in targets {
            if let Err(e) = host.send(handle, channel, buffer.as_bytes(), send_type) {
                log::debug!("Dropping broadcast for {}: {}", id, e);
            }
        }
    }
}

impl<H: Host> Drop for ServerTransport<H> {
    fn drop(&mut self) {
        let queued = self.transport.discard_events();
        let peers = self.clear_peers();
        if queued > 0 || peers > 0 {
            log::debug!("Server dropped {} peers and {} queued events", peers, queued);
        }
    }
}
