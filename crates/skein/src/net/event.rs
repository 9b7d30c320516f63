use std::collections::VecDeque;

use crate::buffer::ByteBuffer;

use super::peer::PeerId;

#[derive(Debug)]
pub enum EventKind {
    Connect,
    Disconnect,
    Packet { channel: u8, buffer: ByteBuffer },
}

#[derive(Debug)]
pub struct NetworkEvent {
    pub kind: EventKind,
    /// Logical time at which the event becomes visible.
    pub time: f64,
    /// Connect/disconnect data sent by the remote side. Zero for packets.
    pub data: u32,
    /// Set by the server transport. Client events always concern its one peer.
    pub peer: Option<PeerId>,
}

impl NetworkEvent {
    pub fn connect(time: f64, data: u32) -> Self {
        Self {
            kind: EventKind::Connect,
            time,
            data,
            peer: None,
        }
    }

    pub fn disconnect(time: f64, data: u32) -> Self {
        Self {
            kind: EventKind::Disconnect,
            time,
            data,
            peer: None,
        }
    }

    pub fn packet(time: f64, channel: u8, buffer: ByteBuffer) -> Self {
        Self {
            kind: EventKind::Packet { channel, buffer },
            time,
            data: 0,
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: Option<PeerId>) -> Self {
        self.peer = peer;
        self
    }

    pub fn is_connect(&self) -> bool {
        matches!(self.kind, EventKind::Connect)
    }

    pub fn is_disconnect(&self) -> bool {
        matches!(self.kind, EventKind::Disconnect)
    }

    pub fn is_packet(&self) -> bool {
        matches!(self.kind, EventKind::Packet { .. })
    }

    pub fn buffer(&self) -> Option<&ByteBuffer> {
        match &self.kind {
            EventKind::Packet { buffer, .. } => Some(buffer),
            _ => None,
        }
    }

    /// Moves the payload out of a packet event.
    pub fn into_buffer(self) -> Option<ByteBuffer> {
        match self.kind {
            EventKind::Packet { buffer, .. } => Some(buffer),
            _ => None,
        }
    }
}

/// Holds events until the logical clock reaches their stamped time.
///
/// Release is strictly FIFO: an event is never handed out ahead of one that
/// was queued before it, even if it carries an earlier stamp.
#[derive(Debug, Default)]
pub struct LagQueue {
    events: VecDeque<NetworkEvent>,
}

impl LagQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: NetworkEvent) {
        self.events.push_back(event);
    }

    pub fn pop_ready(&mut self, now: f64) -> Option<NetworkEvent> {
        match self.events.front() {
            Some(event) if now >= event.time => self.events.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.events.len();
        self.events.clear();
        count
    }
}
