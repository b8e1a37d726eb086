//! Broadcast routing.
//!
//! The router encodes `"<sender>: <text>"` once and hands the bytes to every
//! registered peer except the sender. One peer failing never stops delivery
//! to the rest: the failure is logged, recorded in the [`RouteReport`], and
//! the caller decides how to clean up.

use crate::{
    buffer::{BUFFER_SIZE, ByteBuffer},
    connection::{ConnectionId, Peer},
    error::BufferError,
    message::Message,
    registry::Registry,
};

/// Room left in the write buffer for the `"<id>: "` prefix.
///
/// A `u64` renders to at most 20 digits, plus the separator.
pub const PREFIX_HEADROOM: usize = 32;

/// Result of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Peers that accepted the message
    pub delivered: usize,
    /// Peers whose delivery failed; they should be deregistered
    pub failed: Vec<ConnectionId>,
}

/// Broadcast router owning the write-direction staging buffer.
#[derive(Debug, Clone)]
pub struct Router {
    write: ByteBuffer,
}

impl Default for Router {
    fn default() -> Self {
        Self::for_read_capacity(BUFFER_SIZE)
    }
}

impl Router {
    /// Router whose write buffer holds a full read of `read_capacity` bytes
    /// plus the sender prefix.
    pub fn for_read_capacity(read_capacity: usize) -> Self {
        Self { write: ByteBuffer::new(read_capacity + PREFIX_HEADROOM) }
    }

    /// Broadcast `message` to every peer in `registry` other than its sender.
    ///
    /// With an empty registry (or only the sender registered) this is a
    /// no-op. Fails only if the prefixed message cannot be encoded.
    pub fn route<P: Peer>(
        &mut self,
        registry: &Registry<P>,
        message: &Message,
    ) -> Result<RouteReport, BufferError> {
        let sender = message.sender();
        let bytes = self.write.encode_fmt(format_args!("{sender}: {}", message.text()))?;

        let mut report = RouteReport::default();
        registry.for_each_except(sender, |peer| match peer.deliver(bytes) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::warn!(peer = %peer.id(), %sender, error = %e, "broadcast delivery failed");
                report.failed.push(peer.id());
            },
        });

        tracing::info!(
            %sender,
            delivered = report.delivered,
            failed = report.failed.len(),
            "forwarded: {}",
            message.text()
        );

        self.write.reset();
        Ok(report)
    }
}
