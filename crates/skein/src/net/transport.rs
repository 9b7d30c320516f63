use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::buffer::ByteBuffer;

use super::address::NetworkAddress;
use super::config::TransportConfig;
use super::event::{LagQueue, NetworkEvent};
use super::host::{Host, RawEvent};
use super::udp::MAX_PACKET_SIZE;

/// Turns raw host events into application events. Implemented by the client
/// and server specializations, which keep their connection bookkeeping here.
pub(crate) trait EventHandler<H: Host> {
    fn handle_event(&mut self, host: &H, time: f64, raw: RawEvent) -> NetworkEvent;
}

/// State shared by client and server transports: the host connection, the
/// logical clock, the lag queue, send throttling and bandwidth figures.
#[derive(Debug)]
pub struct Transport<H: Host> {
    connection: Option<H>,
    ping_socket: Option<UdpSocket>,
    time: f64,
    update_timer: f64,
    update_period: f64,
    sent_speed: f64,
    receive_speed: f64,
    second_timer: f64,
    fake_lag: f64,
    events: LagQueue,
    ping_buffer: Vec<u8>,
}

impl<H: Host> Transport<H> {
    pub(crate) fn new(connection: Option<H>, config: &TransportConfig) -> Self {
        Self {
            connection,
            ping_socket: None,
            time: 0.0,
            update_timer: 0.0,
            update_period: config.update_period,
            sent_speed: 0.0,
            receive_speed: 0.0,
            second_timer: 0.0,
            fake_lag: config.fake_lag,
            events: LagQueue::new(),
            ping_buffer: vec![0; MAX_PACKET_SIZE],
        }
    }

    pub(crate) fn update_with(&mut self, frame_time: f64, handler: &mut impl EventHandler<H>) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };

        self.time += frame_time;
        self.update_timer += frame_time;
        self.second_timer += frame_time;

        let stamp = self.time + self.fake_lag;
        loop {
            match connection.service() {
                Ok(Some(raw)) => {
                    let event = handler.handle_event(connection, stamp, raw);
                    self.events.push(event);
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Network poll failed: {}", e);
                    break;
                }
            }
        }

        if self.second_timer >= 1.0 {
            let traffic = connection.take_traffic();
            self.sent_speed = traffic.sent as f64 / self.second_timer;
            self.receive_speed = traffic.received as f64 / self.second_timer;
            self.second_timer -= 1.0;
        }
    }

    /// Next event whose stamped time has been reached, if any.
    pub fn get_network_event(&mut self) -> Option<NetworkEvent> {
        self.events.pop_ready(self.time)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Drops every queued event, including ones not yet visible.
    pub fn discard_events(&mut self) -> usize {
        self.events.clear()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    pub fn host(&self) -> Option<&H> {
        self.connection.as_ref()
    }

    pub fn host_mut(&mut self) -> Option<&mut H> {
        self.connection.as_mut()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_fake_lag(&mut self, value: f64) {
        self.fake_lag = value.max(0.0);
    }

    pub fn fake_lag(&self) -> f64 {
        self.fake_lag
    }

    pub fn sent_speed(&self) -> f64 {
        self.sent_speed
    }

    pub fn receive_speed(&self) -> f64 {
        self.receive_speed
    }

    pub fn set_update_period(&mut self, update_period: f64) {
        self.update_period = update_period;
    }

    pub fn update_period(&self) -> f64 {
        self.update_period
    }

    pub fn needs_update(&self) -> bool {
        self.update_timer >= self.update_period
    }

    pub fn reset_update_timer(&mut self) {
        self.update_timer = 0.0;
    }

    pub(crate) fn set_ping_socket(&mut self, socket: UdpSocket) {
        self.ping_socket = Some(socket);
    }

    pub fn ping_addr(&self) -> Option<SocketAddr> {
        self.ping_socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Polls the ping socket once. `None` means nothing arrived this tick.
    pub fn check_pings(&mut self) -> Option<(ByteBuffer, NetworkAddress)> {
        let socket = self.ping_socket.as_ref()?;

        match socket.recv_from(&mut self.ping_buffer) {
            Ok((size, SocketAddr::V4(from))) if size > 0 => {
                Some((ByteBuffer::from_slice(&self.ping_buffer[..size]), from.into()))
            }
            Ok(_) => None,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                log::debug!("Ping socket receive failed: {}", e);
                None
            }
        }
    }

    /// Sends `buffer` on the ping socket without any connection. Failures are
    /// logged and dropped.
    pub fn send_ping_packet(&self, buffer: &ByteBuffer, address: NetworkAddress) {
        let Some(socket) = self.ping_socket.as_ref() else {
            log::debug!("No ping socket, dropping ping to {}", address);
            return;
        };

        if let Err(e) = socket.send_to(buffer.as_bytes(), address.to_socket_addr()) {
            log::debug!("Ping to {} failed: {}", address, e);
        }
    }
}

pub(crate) fn bind_ping_socket(port: u16, broadcast: bool) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(broadcast)?;
    Ok(socket)
}
