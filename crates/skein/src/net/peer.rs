use std::fmt;

use serde::{Deserialize, Serialize};

use super::host::PeerHandle;

/// Stable identity of a peer inside one server. Never reused, so an id held by
/// a queued event can outlive the peer it names without aliasing a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Non-owning reference to an application object. The transport only checks
/// whether one is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStats {
    pub round_trip_time: u32,
    pub packets_sent: u32,
    pub packets_lost: u32,
}

#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    handle: Option<PeerHandle>,
    pub object: Option<ObjectHandle>,
    stats: PeerStats,
}

impl Peer {
    pub fn new(id: PeerId, handle: Option<PeerHandle>) -> Self {
        Self {
            id,
            handle,
            object: None,
            stats: PeerStats::default(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn handle(&self) -> Option<PeerHandle> {
        self.handle
    }

    pub fn has_object(&self) -> bool {
        self.object.is_some()
    }

    /// Last statistics sampled from the host. Frozen once the peer disconnects.
    pub fn stats(&self) -> PeerStats {
        self.stats
    }

    pub(crate) fn bind(&mut self, handle: PeerHandle) {
        self.handle = Some(handle);
        self.stats = PeerStats::default();
    }

    pub(crate) fn release(&mut self) -> Option<PeerHandle> {
        self.handle.take()
    }

    pub(crate) fn record_stats(&mut self, stats: PeerStats) {
        self.stats = stats;
    }
}
