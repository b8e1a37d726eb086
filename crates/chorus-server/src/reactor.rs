//! Single-threaded readiness reactor.
//!
//! One thread owns the multiplexer, the listener and every connection. Each
//! wait returns a batch of readiness events which are dispatched in order:
//!
//! ```text
//! Idle ──poll──> Dispatching ──batch done──> Idle
//!                     │
//!                     └── wake + shutdown requested ──> Terminated
//! ```
//!
//! Sockets are registered edge-triggered, so every readable event drains
//! the socket until it would block. A read that fills the whole buffer is
//! routed as its own message and the socket is read again.

use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use chorus_core::{ConnectionId, Fill, IdAllocator, Peer, Registry, Router};
use mio::{Events, Interest, Poll, Token, Waker, event::Event, net::TcpListener};

use crate::{
    config::ServerConfig,
    error::ServerError,
    peer::ReactorPeer,
    session::{self, Departure, Verdict},
};

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);

/// Token of the shutdown waker.
pub const WAKER: Token = Token(1);

/// First id handed to a connection; lower values are reserved tokens.
const FIRST_CONNECTION_ID: u64 = 2;

/// Where the reactor is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Blocked waiting for readiness
    Idle,
    /// Handling a batch of ready events
    Dispatching,
    /// Loop has exited; listener and connections are closed
    Terminated,
}

/// Asks a running reactor to stop, from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Request shutdown and wake the reactor. Idempotent.
    pub fn shutdown(&self) -> io::Result<()> {
        self.requested.store(true, Ordering::Release);
        self.waker.wake()
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// One ready event, reduced to what dispatch needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Acceptable,
    Wake,
    Io { id: ConnectionId, readable: bool, writable: bool },
}

impl Readiness {
    fn of(event: &Event) -> Self {
        match event.token() {
            LISTENER => Self::Acceptable,
            WAKER => Self::Wake,
            Token(raw) => Self::Io {
                id: ConnectionId::new(raw as u64),
                // Hang-ups surface as read-closed; the read reports end of stream.
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable(),
            },
        }
    }
}

/// Readiness-driven broadcast server.
#[derive(Debug)]
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry<ReactorPeer>>,
    router: Router,
    ids: IdAllocator,
    config: ServerConfig,
    state: ReactorState,
    shutdown: ShutdownHandle,
}

impl Reactor {
    /// Create the multiplexer, bind the listener and register both.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::Bind` if the address cannot be bound
    /// - `ServerError::Poll` if the multiplexer cannot be created
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let poll = Poll::new().map_err(ServerError::Poll)?;
        let mut listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(ServerError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::Poll)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            events: Events::with_capacity(config.events_capacity),
            poll,
            listener,
            local_addr,
            registry: Arc::new(Registry::new()),
            router: Router::for_read_capacity(config.buffer_size),
            ids: IdAllocator::starting_at(FIRST_CONNECTION_ID),
            config,
            state: ReactorState::Idle,
            shutdown: ShutdownHandle {
                waker: Arc::new(waker),
                requested: Arc::new(AtomicBool::new(false)),
            },
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current loop state.
    pub fn state(&self) -> ReactorState {
        self.state
    }

    /// Shared view of the connected peers.
    pub fn registry(&self) -> Arc<Registry<ReactorPeer>> {
        Arc::clone(&self.registry)
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is requested.
    ///
    /// Per-connection failures only remove that connection. On return the
    /// listener and every connection have been closed.
    ///
    /// # Errors
    ///
    /// - `ServerError::Poll` if waiting on the multiplexer fails
    pub fn run(mut self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr, "reactor listening");

        let outcome = self.event_loop();
        self.terminate();
        outcome
    }

    fn event_loop(&mut self) -> Result<(), ServerError> {
        while !self.shutdown.is_requested() {
            self.state = ReactorState::Idle;
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ServerError::Poll(e));
            }

            self.state = ReactorState::Dispatching;
            let batch: Vec<Readiness> = self.events.iter().map(Readiness::of).collect();
            for readiness in batch {
                match readiness {
                    Readiness::Acceptable => self.accept(),
                    Readiness::Wake => {
                        if self.shutdown.is_requested() {
                            tracing::info!("shutdown requested");
                            return Ok(());
                        }
                    },
                    Readiness::Io { id, readable, writable } => {
                        if writable {
                            self.on_writable(id);
                        }
                        if readable {
                            self.on_readable(id);
                        }
                    },
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    return;
                },
            };

            let id = self.ids.next_id();
            let mut peer = ReactorPeer::new(
                id,
                stream,
                addr,
                self.config.buffer_size,
                self.config.max_pending_bytes,
            );
            if let Err(e) = peer.register(self.poll.registry()) {
                tracing::warn!(%id, %addr, error = %e, "failed to register connection");
                continue;
            }

            if self.registry.register(peer) {
                tracing::info!(%id, %addr, peers = self.registry.count(), "client connected");
            }
        }
    }

    fn on_readable(&mut self, id: ConnectionId) {
        loop {
            let read = self
                .registry
                .with_peer(id, |peer| peer.fill().map(|fill| (fill, peer.decoded().into_owned())));

            let (fill, text) = match read {
                // Already removed earlier in this batch.
                None => return,
                Some(Err(e)) => {
                    self.remove(id, Departure::Failed(e));
                    return;
                },
                Some(Ok(read)) => read,
            };

            // Spurious wakeup: nothing to read and the stream is still open.
            if fill == Fill::Drained(0) {
                return;
            }

            let (verdict, failed) = session::dispatch(&self.registry, &mut self.router, id, &text);
            for unreachable in failed {
                self.remove(unreachable, Departure::Unreachable);
            }
            self.sync_interests();

            if let Verdict::Remove(departure) = verdict {
                self.remove(id, departure);
                return;
            }

            match fill {
                Fill::Full(_) => {},
                Fill::EndOfStream(_) => {
                    self.remove(id, Departure::Closed);
                    return;
                },
                Fill::Drained(_) => return,
            }
        }
    }

    fn on_writable(&mut self, id: ConnectionId) {
        let mio_registry = self.poll.registry();
        let flushed = self
            .registry
            .with_peer(id, |peer| peer.flush().and_then(|()| peer.sync_interest(mio_registry)));

        if let Some(Err(e)) = flushed {
            tracing::debug!(%id, error = %e, "flush failed");
            self.remove(id, Departure::Unreachable);
        }
    }

    /// Match every peer's write interest to whether it has bytes queued.
    fn sync_interests(&mut self) {
        let mio_registry = self.poll.registry();
        let mut failed = Vec::new();
        self.registry.for_each(|peer| {
            if let Err(e) = peer.sync_interest(mio_registry) {
                tracing::debug!(id = %peer.id(), error = %e, "reregister failed");
                failed.push(peer.id());
            }
        });

        for id in failed {
            self.remove(id, Departure::Unreachable);
        }
    }

    fn remove(&mut self, id: ConnectionId, departure: Departure) {
        if let Some(mut peer) = session::remove(&self.registry, id, departure) {
            peer.deregister(self.poll.registry());
        }
    }

    fn terminate(&mut self) {
        for id in self.registry.ids() {
            self.remove(id, Departure::Shutdown);
        }
        self.state = ReactorState::Terminated;
        tracing::info!(addr = %self.local_addr, "reactor stopped");
    }
}
