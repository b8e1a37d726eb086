//! Server configuration.
//!
//! Passed explicitly at construction; nothing reads process-wide state.

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use chorus_core::BUFFER_SIZE;

use crate::error::ServerError;

/// Host the server binds to by default.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the server binds to by default.
pub const DEFAULT_PORT: u16 = 7777;

/// Per-peer cap on bytes waiting for write-readiness before the peer is
/// treated as dead.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 64 * 1024;

/// How long a blocking broadcast write may stall before the receiver is
/// treated as dead.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness events fetched per multiplexer wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 128;

/// Concurrency model driving the shared registry and router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Strategy {
    /// Single-threaded readiness reactor (mio)
    #[default]
    Reactor,
    /// Completion-driven tasks on a tokio runtime
    Completion,
    /// One blocking thread per connection
    Threaded,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reactor => write!(f, "reactor"),
            Self::Completion => write!(f, "completion"),
            Self::Threaded => write!(f, "threaded"),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host name or address to bind
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port
    pub port: u16,
    /// Capacity of each connection's read buffer
    pub buffer_size: usize,
    /// Reactor and completion: pending outbound bytes allowed per peer
    pub max_pending_bytes: usize,
    /// Threaded only: longest a single broadcast write may block
    pub write_timeout: Duration,
    /// Reactor only: readiness events fetched per wait
    pub events_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            buffer_size: BUFFER_SIZE,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            events_capacity: DEFAULT_EVENTS_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Loopback configuration on an ephemeral port.
    pub fn ephemeral() -> Self {
        Self { port: 0, ..Self::default() }
    }

    /// Reject sizes the server cannot work with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.buffer_size == 0 {
            return Err(ServerError::Config("buffer size must be non-zero".to_string()));
        }
        if self.events_capacity == 0 {
            return Err(ServerError::Config("events capacity must be non-zero".to_string()));
        }
        if self.max_pending_bytes == 0 {
            return Err(ServerError::Config("max pending bytes must be non-zero".to_string()));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::Config("write timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Outbound messages a completion peer may queue: the pending byte
    /// budget in units of one read buffer, never less than one.
    pub fn queue_depth(&self) -> usize {
        (self.max_pending_bytes / self.buffer_size.max(1)).max(1)
    }

    /// Resolve `host:port` to the first matching socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ServerError::Config(format!("cannot resolve '{}': {e}", self.host)))?
            .next()
            .ok_or_else(|| ServerError::Config(format!("no address for '{}'", self.host)))
    }
}
