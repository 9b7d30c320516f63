use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use skein::net::{NetworkAddress, NetworkEvent};
use skein::{ByteBuffer, ClientTransport, EventKind, RelayMessage, SendType};

use crate::config::ClientConfig;

const CHAT_CHANNEL: u8 = 0;

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub address: NetworkAddress,
    pub name: String,
    pub players: u16,
}

/// One chat session: connects, introduces itself, and relays lines.
pub struct ChatClient {
    transport: ClientTransport,
    config: ClientConfig,
    object: Option<u32>,
    outbox: Vec<ByteBuffer>,
    started: bool,
    last_tick_time: Instant,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ClientTransport::new(config.transport.clone())?;

        Ok(Self {
            transport,
            config,
            object: None,
            outbox: Vec::new(),
            started: false,
            last_tick_time: Instant::now(),
        })
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.tick_rate.max(1) as f64)
    }

    /// Asks the LAN (and this machine) for relay servers.
    pub fn discover(&mut self) -> Vec<ServerInfo> {
        let request = RelayMessage::Discover.encode();
        let transport = self.transport.transport();
        transport.send_ping_packet(&request, NetworkAddress::broadcast(self.config.ping_port));
        transport.send_ping_packet(
            &request,
            NetworkAddress::new(u32::from(Ipv4Addr::LOCALHOST), self.config.ping_port),
        );

        let mut found: Vec<ServerInfo> = Vec::new();
        let deadline = Instant::now() + Duration::from_secs_f64(self.config.discovery_time);
        while Instant::now() < deadline {
            while let Some((mut buffer, from)) = self.transport.transport_mut().check_pings() {
                let Ok(RelayMessage::Announce {
                    port,
                    players,
                    name,
                }) = RelayMessage::decode(&mut buffer)
                else {
                    continue;
                };

                let address = NetworkAddress::new(from.host, port);
                if found.iter().any(|s| s.address == address) {
                    continue;
                }
                log::info!("Found {} at {} ({} players)", name, address, players);
                found.push(ServerInfo {
                    address,
                    name,
                    players,
                });
            }
            thread::sleep(Duration::from_millis(10));
        }

        found
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.transport.connect(host, port)?;
        self.started = true;
        self.last_tick_time = Instant::now();
        Ok(())
    }

    pub fn say(&mut self, text: &str) {
        let Some(object) = self.object else {
            log::warn!("Not joined yet, dropping message");
            return;
        };
        self.outbox.push(RelayMessage::chat(object, text).encode());
    }

    pub fn quit(&mut self) {
        let force = !self.transport.is_connected();
        self.transport.disconnect(force, 0);
    }

    /// Returns `false` once the session is over.
    pub fn tick_once(&mut self) -> bool {
        let now = Instant::now();
        let frame_time = (now - self.last_tick_time).as_secs_f64();
        self.last_tick_time = now;

        self.transport.update(frame_time);
        while let Some(event) = self.transport.get_network_event() {
            self.handle_event(event);
        }

        if self.transport.transport().needs_update() {
            self.transport.transport_mut().reset_update_timer();
            for buffer in self.outbox.drain(..) {
                self.transport
                    .send_packet(&buffer, SendType::Reliable, CHAT_CHANNEL);
            }
        }

        !(self.started && self.transport.is_disconnected())
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event.kind {
            EventKind::Connect => {
                log::info!("Connected, joining as {}", self.config.name);
                let hello = RelayMessage::Hello {
                    name: self.config.name.clone(),
                };
                self.transport
                    .send_packet(&hello.encode(), SendType::Reliable, CHAT_CHANNEL);
            }
            EventKind::Disconnect => {
                log::info!(
                    "Disconnected ({}), rtt {} ms, {} lost",
                    event.data,
                    self.transport.peer().stats().round_trip_time,
                    self.transport.peer().stats().packets_lost
                );
                self.object = None;
            }
            EventKind::Packet { mut buffer, .. } => match RelayMessage::decode(&mut buffer) {
                Ok(message) => self.handle_message(message),
                Err(e) => log::debug!("Bad message from server: {}", e),
            },
        }
    }

    fn handle_message(&mut self, message: RelayMessage) {
        match message {
            RelayMessage::Welcome { object } => {
                log::info!("Joined as object {}", object);
                self.object = Some(object);
            }
            RelayMessage::Chat {
                urgent,
                from_server,
                from,
                text,
            } => {
                let marker = if urgent { "!" } else { "" };
                if from_server {
                    log::info!("{}[server] {}", marker, text);
                } else {
                    log::info!("{}<{}> {}", marker, from, text);
                }
            }
            RelayMessage::Leave { object } => log::debug!("Object {} left", object),
            other => log::debug!("Unexpected message: {:?}", other),
        }
    }
}
