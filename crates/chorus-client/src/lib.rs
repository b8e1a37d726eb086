//! Chorus client.
//!
//! Connects to a Chorus server, prints every broadcast it receives and
//! forwards console lines to the server. Typing `quit` (or closing the
//! console) ends the session.
//!
//! # Architecture
//!
//! ```text
//! console ──> input thread ─────write──> socket ──> server
//! output  <── ClientReactor (mio) <──read── socket <── server
//! ```
//!
//! The two sides share only the socket and a [`QuitSignal`]; each has its
//! own buffer.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod forwarder;
mod reactor;

use std::io::{BufRead, Write};

pub use config::{ClientConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use error::ClientError;
pub use forwarder::QuitSignal;
pub use reactor::{ClientExit, ClientReactor, ClientState};

/// Connect with `config` and run one session, reading lines from `input`
/// and writing received messages to `output`.
pub fn run<R, W>(config: &ClientConfig, input: R, output: W) -> Result<ClientExit, ClientError>
where
    R: BufRead + Send + 'static,
    W: Write,
{
    ClientReactor::connect(config, output)?.run(input)
}
