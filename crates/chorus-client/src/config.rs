//! Client configuration.

use std::net::{SocketAddr, ToSocketAddrs};

use chorus_core::BUFFER_SIZE;

use crate::error::ClientError;

/// Server host the client connects to by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Server port the client connects to by default.
pub const DEFAULT_PORT: u16 = 7777;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Capacity of the read buffer and of the input forwarder's buffer
    pub buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { host: DEFAULT_HOST.to_string(), port: DEFAULT_PORT, buffer_size: BUFFER_SIZE }
    }
}

impl ClientConfig {
    /// Configuration targeting `addr`.
    pub fn for_addr(addr: SocketAddr) -> Self {
        Self { host: addr.ip().to_string(), port: addr.port(), ..Self::default() }
    }

    /// Resolve `host:port` to the first matching socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ClientError> {
        if self.buffer_size == 0 {
            return Err(ClientError::Config("buffer size must be non-zero".to_string()));
        }

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ClientError::Config(format!("cannot resolve '{}': {e}", self.host)))?
            .next()
            .ok_or_else(|| ClientError::Config(format!("no address for '{}'", self.host)))
    }
}
