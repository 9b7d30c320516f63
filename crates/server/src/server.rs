use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use skein::net::{NetworkAddress, NetworkEvent, ObjectHandle, PeerId};
use skein::{ByteBuffer, EventKind, RelayMessage, SendType, ServerTransport};

use crate::config::ServerConfig;

const CHAT_CHANNEL: u8 = 0;
const CONTROL_CHANNEL: u8 = 1;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

struct Outgoing {
    buffer: ByteBuffer,
    except: Option<PeerId>,
}

/// Chat relay: peers announce themselves with a hello, receive an object
/// handle, and from then on take part in the broadcast.
pub struct RelayServer {
    transport: ServerTransport,
    config: ServerConfig,
    names: HashMap<PeerId, String>,
    outbox: Vec<Outgoing>,
    next_object: u32,
    running: Arc<AtomicBool>,
    last_tick_time: Instant,
    stats_timer: f64,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let mut transport =
            ServerTransport::bind(config.max_peers, config.port, config.transport.clone())?;
        if !transport.has_connection() {
            bail!("could not listen on port {}", config.port);
        }

        if let Err(e) = transport.create_ping_socket(config.ping_port) {
            log::warn!("Discovery disabled, ping port {}: {}", config.ping_port, e);
        }

        Ok(Self {
            transport,
            config,
            names: HashMap::new(),
            outbox: Vec::new(),
            next_object: 1,
            running: Arc::new(AtomicBool::new(true)),
            last_tick_time: Instant::now(),
            stats_timer: 0.0,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.transport.listen_port()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn run(&mut self) {
        let tick = Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64);
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(tick);
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let frame_time = (now - self.last_tick_time).as_secs_f64();
        self.last_tick_time = now;

        self.transport.update(frame_time);
        while let Some(event) = self.transport.get_network_event() {
            self.handle_event(event);
        }

        self.answer_pings();

        if self.transport.transport().needs_update() {
            self.transport.transport_mut().reset_update_timer();
            self.flush_outbox();
        }

        self.stats_timer += frame_time;
        if self.config.stats_interval > 0.0 && self.stats_timer >= self.config.stats_interval {
            self.stats_timer = 0.0;
            self.log_stats();
        }
    }

    /// Disconnects everyone and waits briefly for the acknowledgments.
    pub fn shutdown(&mut self) {
        self.flush_outbox();
        self.transport.disconnect_all(0);

        let start = Instant::now();
        while !self.names.is_empty() && start.elapsed() < SHUTDOWN_TIMEOUT {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
        log::info!("Server shut down, {} peers left", self.transport.peer_count());
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        let Some(id) = event.peer else {
            return;
        };

        match event.kind {
            EventKind::Connect => {
                log::info!("{} connected", id);
            }
            EventKind::Disconnect => {
                self.handle_disconnect(id, event.data);
            }
            EventKind::Packet {
                channel,
                mut buffer,
            } => match RelayMessage::decode(&mut buffer) {
                Ok(message) => self.handle_message(id, message),
                Err(e) => log::debug!("Bad message from {} on channel {}: {}", id, channel, e),
            },
        }
    }

    fn handle_message(&mut self, id: PeerId, message: RelayMessage) {
        match message {
            RelayMessage::Hello { name } => self.attach(id, name),
            RelayMessage::Chat { urgent, text, .. } => {
                let Some(object) = self.transport.peer(id).and_then(|p| p.object) else {
                    log::debug!("Chat from {} before hello", id);
                    return;
                };
                let name = self.names.get(&id).map_or("?", String::as_str);
                log::info!("<{}> {}", name, text);

                let relayed = RelayMessage::Chat {
                    urgent,
                    from_server: false,
                    from: object.0,
                    text,
                };
                self.queue(relayed.encode(), Some(id));
            }
            other => log::debug!("Unexpected message from {}: {:?}", id, other),
        }
    }

    fn attach(&mut self, id: PeerId, name: String) {
        let Some(peer) = self.transport.peer_mut(id) else {
            return;
        };
        if peer.has_object() {
            return;
        }

        let object = ObjectHandle(self.next_object);
        self.next_object += 1;
        peer.object = Some(object);

        log::info!("{} joined as {} (object {})", id, name, object.0);
        let welcome = RelayMessage::Welcome { object: object.0 };
        self.transport
            .send_packet(&welcome.encode(), id, SendType::Reliable, CONTROL_CHANNEL);

        self.queue(
            RelayMessage::server_notice(format!("{} joined", name)).encode(),
            Some(id),
        );
        self.names.insert(id, name);
    }

    fn handle_disconnect(&mut self, id: PeerId, data: u32) {
        let Some(peer) = self.transport.delete_peer(id) else {
            return;
        };

        let stats = peer.stats();
        log::info!(
            "{} disconnected ({}), rtt {} ms, {} sent, {} lost",
            id,
            data,
            stats.round_trip_time,
            stats.packets_sent,
            stats.packets_lost
        );

        let name = self.names.remove(&id);
        if let (Some(object), Some(name)) = (peer.object, name) {
            self.queue(RelayMessage::Leave { object: object.0 }.encode(), None);
            self.queue(
                RelayMessage::server_notice(format!("{} left", name)).encode(),
                None,
            );
        }
    }

    fn answer_pings(&mut self) {
        while let Some((mut buffer, from)) = self.transport.transport_mut().check_pings() {
            match RelayMessage::decode(&mut buffer) {
                Ok(RelayMessage::Discover) => self.announce(from),
                Ok(other) => log::debug!("Ignoring {:?} from {}", other, from),
                Err(e) => log::debug!("Bad ping from {}: {}", from, e),
            }
        }
    }

    fn announce(&self, to: NetworkAddress) {
        let players = self.transport.peers().filter(|p| p.has_object()).count();
        let announce = RelayMessage::Announce {
            port: self.listen_port(),
            players: players.min(u16::MAX as usize) as u16,
            name: self.config.name.clone(),
        };
        log::debug!("Announcing to {}", to);
        self.transport
            .transport()
            .send_ping_packet(&announce.encode(), to);
    }

    fn queue(&mut self, buffer: ByteBuffer, except: Option<PeerId>) {
        self.outbox.push(Outgoing { buffer, except });
    }

    fn flush_outbox(&mut self) {
        for outgoing in self.outbox.drain(..) {
            self.transport.broadcast_packet(
                &outgoing.buffer,
                outgoing.except,
                SendType::Reliable,
                CHAT_CHANNEL,
            );
        }
    }

    fn log_stats(&self) {
        let transport = self.transport.transport();
        log::info!(
            "{} peers, {:.0} B/s out, {:.0} B/s in",
            self.transport.peer_count(),
            transport.sent_speed(),
            transport.receive_speed()
        );
        for peer in self.transport.peers() {
            let stats = peer.stats();
            log::debug!(
                "  {}: rtt {} ms, {} sent, {} lost",
                peer.id(),
                stats.round_trip_time,
                stats.packets_sent,
                stats.packets_lost
            );
        }
    }
}
