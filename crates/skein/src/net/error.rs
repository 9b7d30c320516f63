use std::io;

use super::host::HostError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network system is not initialized")]
    NotInitialized,
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("transport has no connection")]
    NoConnection,
}
