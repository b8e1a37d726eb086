//! Per-message handling shared by every strategy.
//!
//! Whatever the concurrency model, one decoded read leads to the same
//! decision: broadcast it, or remove the sender. Removal always goes through
//! [`remove`] so departures are logged the same way everywhere.

use std::io;

use chorus_core::{ConnectionId, Fill, Inbound, Message, Peer, Registry, Router};

/// Why a connection is leaving the registry.
#[derive(Debug)]
pub(crate) enum Departure {
    /// Peer sent the quit token
    Quit,
    /// Peer closed its end of the stream
    Closed,
    /// Reading from the peer failed
    Failed(io::Error),
    /// Delivering a broadcast to the peer failed
    Unreachable,
    /// Server is shutting down
    Shutdown,
}

/// What the caller should do with the sender after one decoded read.
#[derive(Debug)]
pub(crate) enum Verdict {
    /// Keep reading from the sender
    Keep,
    /// Remove the sender
    Remove(Departure),
}

/// Deregister and close `id`, logging why.
///
/// Returns the peer if this call removed it; `None` if it was already gone.
pub(crate) fn remove<P: Peer>(
    registry: &Registry<P>,
    id: ConnectionId,
    departure: Departure,
) -> Option<P> {
    let peer = registry.deregister(id)?;
    let peers = registry.count();

    match departure {
        Departure::Quit => tracing::info!(%id, peers, "client quit"),
        Departure::Closed => tracing::info!(%id, peers, "client disconnected"),
        Departure::Failed(e) => {
            tracing::warn!(%id, peers, error = %e, "client removed after read error");
        },
        Departure::Unreachable => tracing::warn!(%id, peers, "client removed after write error"),
        Departure::Shutdown => tracing::debug!(%id, "client closed on shutdown"),
    }

    Some(peer)
}

/// Decide what one decoded read from `sender` means, broadcasting it if it
/// is an ordinary message.
///
/// Peers that failed to accept the broadcast are returned for removal; the
/// caller owns strategy-specific cleanup (e.g. multiplexer deregistration).
pub(crate) fn dispatch<P: Peer>(
    registry: &Registry<P>,
    router: &mut Router,
    sender: ConnectionId,
    text: &str,
) -> (Verdict, Vec<ConnectionId>) {
    match Inbound::classify(sender, text) {
        Inbound::Empty => (Verdict::Remove(Departure::Closed), Vec::new()),
        Inbound::Quit => (Verdict::Remove(Departure::Quit), Vec::new()),
        Inbound::Broadcast(message) => (Verdict::Keep, broadcast(registry, router, &message)),
    }
}

/// Apply one completed read from `sender`, removing whoever has to go.
///
/// Returns `false` once `sender` has left and its reader should stop. Used
/// by strategies whose peers need no cleanup beyond [`Peer::close`].
pub(crate) fn settle_read<P: Peer>(
    registry: &Registry<P>,
    router: &mut Router,
    sender: ConnectionId,
    fill: Fill,
    text: &str,
) -> bool {
    let (verdict, failed) = dispatch(registry, router, sender, text);
    for id in failed {
        remove(registry, id, Departure::Unreachable);
    }

    if let Verdict::Remove(departure) = verdict {
        remove(registry, sender, departure);
        return false;
    }
    if fill.is_end_of_stream() {
        remove(registry, sender, Departure::Closed);
        return false;
    }
    true
}

fn broadcast<P: Peer>(
    registry: &Registry<P>,
    router: &mut Router,
    message: &Message,
) -> Vec<ConnectionId> {
    match router.route(registry, message) {
        Ok(report) => report.failed,
        Err(e) => {
            tracing::warn!(sender = %message.sender(), error = %e, "dropping message");
            Vec::new()
        },
    }
}
