//! Connection registry for tracking open peers.
//!
//! The registry is the single owner of every live [`Peer`]. The accept path
//! adds peers, the read path removes them, and the router borrows them one at
//! a time to deliver a broadcast. All three may run on different threads
//! depending on the strategy, so every operation takes the internal lock.
//!
//! Removing a peer closes it. Removal is idempotent: deregistering an id that
//! is already gone is a no-op, so the "read failed" and "peer said quit" paths
//! can both try to clean up without coordinating.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::connection::{ConnectionId, Peer};

/// Registry for tracking open peer connections.
///
/// Keyed by [`ConnectionId`]. Iteration order is unspecified, so broadcast
/// order is best-effort only.
#[derive(Debug)]
pub struct Registry<P> {
    peers: Mutex<HashMap<ConnectionId, P>>,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self { peers: Mutex::new(HashMap::new()) }
    }
}

impl<P: Peer> Registry<P> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer.
    ///
    /// Returns `false` if a peer with the same id is already registered; the
    /// rejected peer is closed and dropped.
    pub fn register(&self, mut peer: P) -> bool {
        let id = peer.id();
        let mut peers = self.lock();
        if peers.contains_key(&id) {
            drop(peers);
            peer.close();
            return false;
        }

        peers.insert(id, peer);
        true
    }

    /// Remove a peer and close its handle.
    ///
    /// Returns the closed peer if it was registered, `None` otherwise.
    pub fn deregister(&self, id: ConnectionId) -> Option<P> {
        let mut peer = self.lock().remove(&id)?;
        peer.close();
        Some(peer)
    }

    /// Run `f` on every peer except `sender`.
    ///
    /// Exclusion is by identity, never by content. The lock is held for the
    /// whole walk, so `f` must not call back into the registry.
    pub fn for_each_except<F>(&self, sender: ConnectionId, mut f: F)
    where
        F: FnMut(&mut P),
    {
        for (id, peer) in self.lock().iter_mut() {
            if *id != sender {
                f(peer);
            }
        }
    }

    /// Run `f` on every peer.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&mut P),
    {
        self.lock().values_mut().for_each(f);
    }

    /// Run `f` on a single peer, if registered.
    pub fn with_peer<F, T>(&self, id: ConnectionId, f: F) -> Option<T>
    where
        F: FnOnce(&mut P) -> T,
    {
        self.lock().get_mut(&id).map(f)
    }

    /// Check if a peer is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Snapshot of every registered id.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().keys().copied().collect()
    }

    /// Total number of registered peers.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deregister and close every peer. Returns how many were removed.
    pub fn drain(&self) -> usize {
        let drained: Vec<P> = self.lock().drain().map(|(_, peer)| peer).collect();
        let count = drained.len();
        for mut peer in drained {
            peer.close();
        }
        count
    }

    // A panic on another thread while holding the lock leaves the map itself
    // consistent (every mutation is a single insert/remove), so keep serving.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, P>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[derive(Debug)]
    struct FakePeer {
        id: ConnectionId,
        received: Vec<Vec<u8>>,
        closes: usize,
    }

    impl FakePeer {
        fn new(id: u64) -> Self {
            Self { id: ConnectionId::new(id), received: Vec::new(), closes: 0 }
        }
    }

    impl Peer for FakePeer {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn deliver(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.received.push(bytes.to_vec());
            Ok(())
        }

        fn close(&mut self) {
            self.closes += 1;
        }
    }

    #[test]
    fn register_and_count() {
        let registry = Registry::new();

        assert_eq!(registry.count(), 0);
        assert!(registry.is_empty());

        assert!(registry.register(FakePeer::new(1)));
        assert!(registry.register(FakePeer::new(2)));

        assert_eq!(registry.count(), 2);
        assert!(registry.contains(ConnectionId::new(1)));
        assert!(!registry.contains(ConnectionId::new(3)));
    }

    #[test]
    fn register_duplicate_id_fails() {
        let registry = Registry::new();

        assert!(registry.register(FakePeer::new(1)));
        assert!(!registry.register(FakePeer::new(1)));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn deregister_closes_peer() {
        let registry = Registry::new();
        registry.register(FakePeer::new(1));

        let peer = registry.deregister(ConnectionId::new(1)).unwrap();
        assert_eq!(peer.closes, 1);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn deregister_is_idempotent() {
        let registry = Registry::new();
        registry.register(FakePeer::new(1));

        assert!(registry.deregister(ConnectionId::new(1)).is_some());
        assert!(registry.deregister(ConnectionId::new(1)).is_none());
        assert!(registry.deregister(ConnectionId::new(99)).is_none());
    }

    #[test]
    fn for_each_except_skips_sender() {
        let registry = Registry::new();
        for id in 1..=4 {
            registry.register(FakePeer::new(id));
        }

        let mut visited = Vec::new();
        registry.for_each_except(ConnectionId::new(3), |peer| visited.push(peer.id().get()));
        visited.sort_unstable();

        assert_eq!(visited, vec![1, 2, 4]);
    }

    #[test]
    fn for_each_except_on_empty_registry_is_noop() {
        let registry: Registry<FakePeer> = Registry::new();

        let mut calls = 0;
        registry.for_each_except(ConnectionId::new(1), |_| calls += 1);

        assert_eq!(calls, 0);
    }

    #[test]
    fn with_peer_reaches_single_peer() {
        let registry = Registry::new();
        registry.register(FakePeer::new(5));

        let delivered =
            registry.with_peer(ConnectionId::new(5), |peer| peer.deliver(b"x").is_ok());
        assert_eq!(delivered, Some(true));
        assert_eq!(registry.with_peer(ConnectionId::new(6), |_| ()), None);
    }

    #[test]
    fn drain_closes_everything() {
        let registry = Registry::new();
        for id in 1..=3 {
            registry.register(FakePeer::new(id));
        }

        assert_eq!(registry.drain(), 3);
        assert!(registry.is_empty());
        assert!(registry.ids().is_empty());
    }

    #[test]
    fn registry_is_shareable_across_threads() {
        let registry = std::sync::Arc::new(Registry::new());

        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || registry.register(FakePeer::new(id)))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }

        assert_eq!(registry.count(), 8);
    }
}
