use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HijackError {
    #[error("failed to bind resolver socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to set SO_BINDTODEVICE for {interface}: {source}")]
    BindToDevice {
        interface: String,
        source: std::io::Error,
    },

    #[error("failed to spawn resolver thread: {0}")]
    Spawn(std::io::Error),

    #[error("invalid resolver configuration: {0}")]
    InvalidConfig(String),
}
