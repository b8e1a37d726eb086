//! Connection identity and the peer abstraction.
//!
//! A [`Peer`] is one open connection as seen by the registry and the router:
//! something with a stable identity that can accept outbound bytes and be
//! closed. Every concurrency strategy (readiness reactor, completion tasks,
//! thread-per-connection) supplies its own `Peer` implementation, so the
//! registry and router never know how bytes actually reach the socket.

use std::{
    fmt, io,
    sync::atomic::{AtomicU64, Ordering},
};

/// Unique identity of one peer connection.
///
/// Identities are allocated monotonically and never reused for the lifetime
/// of an [`IdAllocator`]. The decimal rendering is what other peers see as the
/// sender prefix of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identity value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identity value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Monotonic source of [`ConnectionId`]s.
///
/// Safe to share between the accept path and any other thread; ids are handed
/// out with a relaxed fetch-add since only uniqueness matters.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    /// Allocator whose first id is `first`.
    pub const fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    /// Next unused id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// One registered connection.
///
/// Implementations decide how `deliver` reaches the wire: a write-through on a
/// non-blocking socket with a pending outbox, a blocking `write_all`, or a
/// hand-off to a writer task. `deliver` must not block indefinitely on a
/// non-blocking handle and must report a dead peer as an error.
pub trait Peer {
    /// Identity used for sender exclusion and the broadcast prefix.
    fn id(&self) -> ConnectionId;

    /// Hand `bytes` to the peer in full, or fail.
    fn deliver(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Release the underlying handle. Called once by the registry on removal;
    /// implementations must tolerate repeated calls.
    fn close(&mut self);
}
