use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};

pub const NETWORK_BROADCAST: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub host: u32,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: u32, port: u16) -> Self {
        Self { host, port }
    }

    pub fn broadcast(port: u16) -> Self {
        Self::new(NETWORK_BROADCAST, port)
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.host)
    }

    /// Returns `None` for IPv6 addresses.
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(v4.into()),
            SocketAddr::V6(_) => None,
        }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::from(*self))
    }
}

impl From<SocketAddrV4> for NetworkAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<NetworkAddress> for SocketAddrV4 {
    fn from(addr: NetworkAddress) -> Self {
        SocketAddrV4::new(addr.ip(), addr.port)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let addr = NetworkAddress::new(u32::from(Ipv4Addr::new(192, 168, 1, 20)), 27015);
        assert_eq!(addr.to_string(), "192.168.1.20:27015");
        assert_eq!(NetworkAddress::broadcast(9).to_string(), "255.255.255.255:9");
    }

    #[test]
    fn test_socket_addr_conversion() {
        let socket: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let addr = NetworkAddress::from_socket_addr(socket).unwrap();
        assert_eq!(addr.port, 4000);
        assert_eq!(addr.to_socket_addr(), socket);

        let v6: SocketAddr = "[::1]:4000".parse().unwrap();
        assert!(NetworkAddress::from_socket_addr(v6).is_none());
    }
}
