use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Outgoing link impairment for a `UdpHost`. Percentages are 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
}

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    order: u64,
    addr: SocketAddr,
    bytes: Vec<u8>,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Drops, duplicates and delays datagrams before they reach the socket.
/// Differing delays reorder them.
#[derive(Debug)]
pub struct NetworkSimulator {
    config: LossSimulation,
    queue: BinaryHeap<DelayedDatagram>,
    next_order: u64,
    rng: u64,
    dropped: u64,
}

impl NetworkSimulator {
    pub fn new(config: LossSimulation) -> Self {
        Self {
            config,
            queue: BinaryHeap::new(),
            next_order: 0,
            // xorshift needs a nonzero state
            rng: RandomState::new().hash_one(Instant::now()) | 1,
            dropped: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &LossSimulation {
        &self.config
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn enqueue(&mut self, addr: SocketAddr, bytes: &[u8], now: Instant) {
        let impaired = self.config.enabled;
        if impaired && self.roll() < self.config.loss_percent {
            self.dropped += 1;
            return;
        }

        let copies = if impaired && self.roll() < self.config.duplicate_percent {
            2
        } else {
            1
        };
        for _ in 0..copies {
            let delay = if impaired { self.delay() } else { Duration::ZERO };
            let release_time = now + delay;
            let order = self.next_order;
            self.next_order += 1;
            self.queue.push(DelayedDatagram {
                release_time,
                order,
                addr,
                bytes: bytes.to_vec(),
            });
        }
    }

    /// Datagrams whose delay has passed, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut due = Vec::new();
        while self.queue.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(datagram) = self.queue.pop() {
                due.push((datagram.addr, datagram.bytes));
            }
        }
        due
    }

    fn delay(&mut self) -> Duration {
        let min = self.config.min_latency_ms;
        let range = self.config.max_latency_ms.saturating_sub(min);
        let extra = (self.roll() / 100.0 * range as f32) as u32;
        Duration::from_millis(u64::from(min + extra))
    }

    /// Uniform in `0..100`.
    fn roll(&mut self) -> f32 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        (self.rng >> 40) as f32 / (1u64 << 24) as f32 * 100.0
    }
}
