mod address;
mod client;
mod config;
mod error;
mod event;
mod host;
mod peer;
mod scripted;
mod server;
mod simulator;
mod system;
mod tracking;
mod transport;
mod udp;

pub use address::{NETWORK_BROADCAST, NetworkAddress};
pub use client::{ClientState, ClientTransport};
pub use config::{DEFAULT_CHANNEL_COUNT, DEFAULT_UPDATE_PERIOD, HostConfig, TransportConfig};
pub use error::TransportError;
pub use event::{EventKind, LagQueue, NetworkEvent};
pub use host::{Host, HostError, PeerHandle, RawEvent, SendType, Traffic};
pub use peer::{ObjectHandle, Peer, PeerId, PeerStats};
pub use scripted::{ScriptedHost, SentPacket};
pub use server::ServerTransport;
pub use simulator::{LossSimulation, NetworkSimulator};
pub use system::{close_system, initialize_system, is_initialized};
pub use tracking::{Receipt, ReceiveWindow, ReliableWindow, more_recent_ack};
pub use transport::Transport;
pub use udp::{DATA_HEADER_SIZE, FRAME_MAGIC, FrameFlags, MAX_PACKET_SIZE, UdpHost};
