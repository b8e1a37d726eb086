//! Server error types.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that can occur in the server.
///
/// Every variant is a setup or loop-level failure. Failures of a single
/// connection never surface here: they remove that connection and the
/// server keeps serving everyone else.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error (unresolvable host, zero-sized buffers, etc.).
    ///
    /// Fatal - fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// The listening socket could not be bound.
    ///
    /// Fatal - usually the port is already in use.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The readiness multiplexer could not be created or polled.
    #[error("multiplexer error: {0}")]
    Poll(#[source] io::Error),

    /// Other I/O error at server level.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The async runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_display() {
        let err = ServerError::Config("buffer size must be non-zero".to_string());
        assert_eq!(err.to_string(), "configuration error: buffer size must be non-zero");

        let addr: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        let err = ServerError::Bind { addr, source: io::ErrorKind::AddrInUse.into() };
        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:7777: "));

        let err = ServerError::Poll(io::Error::other("epoll_create failed"));
        assert_eq!(err.to_string(), "multiplexer error: epoll_create failed");
    }

    #[test]
    fn io_error_converts() {
        let err: ServerError = io::Error::other("boom").into();
        assert!(matches!(err, ServerError::Io(_)));
    }
}
