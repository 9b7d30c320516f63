pub mod buffer;
pub mod message;
pub mod net;

pub use buffer::ByteBuffer;
pub use message::{MessageError, RelayMessage};
pub use net::{
    ClientState, ClientTransport, EventKind, Host, NetworkAddress, NetworkEvent, ObjectHandle,
    Peer, PeerId, PeerStats, ScriptedHost, SendType, ServerTransport, Transport, TransportConfig,
    TransportError, UdpHost, close_system, initialize_system, more_recent_ack,
};

pub const DEFAULT_PORT: u16 = 27015;
pub const DEFAULT_PING_PORT: u16 = 27016;
