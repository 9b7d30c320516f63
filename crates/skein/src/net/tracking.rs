use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

pub(crate) const MAX_HELD_PACKETS: usize = 512;
const INITIAL_SRTT_MS: f32 = 100.0;
const INITIAL_RTT_VAR_MS: f32 = 50.0;

/// Whether `current` is newer than `previous` on a counter that wraps after
/// `max`. Counters closer than half the range compare directly, anything
/// further apart is assumed to have wrapped.
#[inline]
pub fn more_recent_ack(previous: u16, current: u16, max: u16) -> bool {
    (current > previous && current - previous <= max / 2)
        || (previous > current && previous - current > max / 2)
}

#[derive(Debug, Clone)]
struct InFlight {
    channel: u8,
    sequence: u16,
    frame: Vec<u8>,
    sent_at: Instant,
    retries: u32,
}

/// Reliable frames sent to one peer that are still waiting for an ack, plus
/// the smoothed round trip estimate used to time their resends.
#[derive(Debug)]
pub struct ReliableWindow {
    in_flight: VecDeque<InFlight>,
    next_sequence: Vec<u16>,
    srtt: f32,
    rtt_var: f32,
    packets_lost: u32,
}

impl ReliableWindow {
    pub fn new(channels: u8) -> Self {
        Self {
            in_flight: VecDeque::new(),
            next_sequence: vec![0; channels as usize],
            srtt: INITIAL_SRTT_MS,
            rtt_var: INITIAL_RTT_VAR_MS,
            packets_lost: 0,
        }
    }

    pub fn next_sequence(&mut self, channel: u8) -> u16 {
        let slot = &mut self.next_sequence[channel as usize];
        let sequence = *slot;
        *slot = slot.wrapping_add(1);
        sequence
    }

    pub fn track(&mut self, channel: u8, sequence: u16, frame: Vec<u8>, now: Instant) {
        self.in_flight.push_back(InFlight {
            channel,
            sequence,
            frame,
            sent_at: now,
            retries: 0,
        });
    }

    /// Returns false for acks of frames no longer in flight.
    pub fn acknowledge(&mut self, channel: u8, sequence: u16, now: Instant) -> bool {
        let Some(index) = self
            .in_flight
            .iter()
            .position(|f| f.channel == channel && f.sequence == sequence)
        else {
            return false;
        };

        if let Some(frame) = self.in_flight.remove(index) {
            // Resent frames give ambiguous samples.
            if frame.retries == 0 {
                let rtt = now.duration_since(frame.sent_at).as_secs_f32() * 1000.0;
                self.update_rtt(rtt);
            }
        }

        true
    }

    /// Frames whose retransmission timeout expired. Each one counts as lost.
    pub fn take_resends(&mut self, now: Instant, resend_min: Duration) -> Vec<Vec<u8>> {
        let timeout = self.resend_timeout(resend_min);
        let mut frames = Vec::new();

        for frame in &mut self.in_flight {
            let backoff = timeout * 2u32.pow(frame.retries.min(5));
            if now.duration_since(frame.sent_at) >= backoff {
                frame.retries += 1;
                frame.sent_at = now;
                frames.push(frame.frame.clone());
            }
        }

        self.packets_lost = self.packets_lost.saturating_add(frames.len() as u32);
        frames
    }

    pub fn resend_timeout(&self, resend_min: Duration) -> Duration {
        let millis = self.srtt + 4.0 * self.rtt_var;
        Duration::from_secs_f32(millis / 1000.0).max(resend_min)
    }

    pub fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn packets_lost(&self) -> u32 {
        self.packets_lost
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// What a [`ReceiveWindow`] did with an incoming reliable frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// Payloads that became deliverable, in send order.
    Delivered(Vec<Vec<u8>>),
    /// Kept until the gap before it is filled.
    Held,
    /// Already delivered or already held.
    Duplicate,
    /// Not kept. The frame must not be acknowledged so the sender resends it.
    Rejected,
}

impl Receipt {
    pub fn should_ack(&self) -> bool {
        !matches!(self, Receipt::Rejected)
    }

    pub fn into_ready(self) -> Vec<Vec<u8>> {
        match self {
            Receipt::Delivered(ready) => ready,
            _ => Vec::new(),
        }
    }
}

/// Restores send order of one reliable channel.
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    expected: u16,
    held: BTreeMap<u16, Vec<u8>>,
}

impl ReceiveWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, sequence: u16, payload: Vec<u8>) -> Receipt {
        if sequence == self.expected {
            let mut ready = vec![payload];
            self.expected = self.expected.wrapping_add(1);

            while let Some(next) = self.held.remove(&self.expected) {
                ready.push(next);
                self.expected = self.expected.wrapping_add(1);
            }
            return Receipt::Delivered(ready);
        }

        if !more_recent_ack(self.expected, sequence, u16::MAX) || self.held.contains_key(&sequence)
        {
            return Receipt::Duplicate;
        }

        if self.held.len() >= MAX_HELD_PACKETS {
            return Receipt::Rejected;
        }

        self.held.insert(sequence, payload);
        Receipt::Held
    }

    pub fn expected(&self) -> u16 {
        self.expected
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }
}
