//! Client error types.

use std::{io, net::SocketAddr};

use thiserror::Error;

/// Errors that stop the client before or outside a normal session end.
///
/// The server closing the connection is not an error; it is reported as
/// [`ClientExit::ServerClosed`](crate::ClientExit::ServerClosed).
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error (unresolvable host, zero-sized buffer, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection to the server could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Server address
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// The readiness multiplexer could not be created or polled.
    #[error("multiplexer error: {0}")]
    Poll(#[source] io::Error),

    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
