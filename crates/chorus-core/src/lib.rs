//! Chorus core.
//!
//! Transport-agnostic pieces of the Chorus broadcast chat: connection
//! identity, the peer registry, fixed-capacity staging buffers, inbound
//! message classification, and the broadcast router.
//!
//! # Architecture
//!
//! Nothing in this crate touches a socket directly. Each server strategy
//! (readiness reactor, completion tasks, thread-per-connection) implements
//! [`Peer`] for its own connection type and drives the shared pieces:
//!
//! ```text
//! accept ──> Registry::register
//! read   ──> ByteBuffer::fill ──> decode ──> Inbound::classify
//!                                               ├─ Empty / Quit ──> Registry::deregister
//!                                               └─ Broadcast    ──> Router::route ──> Peer::deliver
//! ```
//!
//! # Components
//!
//! - [`Registry`]: synchronized set of live peers
//! - [`ByteBuffer`]: half-duplex staging buffer with UTF-8 encode/decode
//! - [`Inbound`]: classification of one decoded read
//! - [`Router`]: sender-excluding broadcast with per-peer failure isolation

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod buffer;
pub mod connection;
mod error;
pub mod message;
pub mod registry;
pub mod router;

pub use buffer::{BUFFER_SIZE, ByteBuffer, Fill, Flush};
pub use connection::{ConnectionId, IdAllocator, Peer};
pub use error::BufferError;
pub use message::{Inbound, Message, QUIT_TOKEN};
pub use registry::Registry;
pub use router::{RouteReport, Router};
