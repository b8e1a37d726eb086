//! Thread-per-connection strategy with blocking sockets.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chorus_core::{ByteBuffer, ConnectionId, IdAllocator, Registry, Router};

use crate::{
    config::ServerConfig,
    error::ServerError,
    peer::StreamPeer,
    session::{self, Departure},
};

/// Stops a running [`ThreadedServer`] from any thread.
#[derive(Debug, Clone)]
pub struct ThreadedShutdown {
    requested: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ThreadedShutdown {
    /// Request shutdown. The blocked accept is released by a throwaway
    /// connection to the listener. Idempotent.
    pub fn shutdown(&self) {
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = TcpStream::connect(self.addr) {
            tracing::debug!(addr = %self.addr, error = %e, "wake connection failed");
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Broadcast server with one blocking reader thread per connection.
///
/// Broadcasts write synchronously from the sender's thread while holding
/// the registry lock. Each write is bounded by the configured write timeout;
/// a receiver that stalls past it is removed as unreachable.
#[derive(Debug)]
pub struct ThreadedServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry<StreamPeer>>,
    ids: IdAllocator,
    buffer_size: usize,
    write_timeout: Duration,
    shutdown: ThreadedShutdown,
    readers: Vec<JoinHandle<()>>,
}

impl ThreadedServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::Bind` if the address cannot be bound
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let listener =
            TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(Registry::new()),
            ids: IdAllocator::default(),
            buffer_size: config.buffer_size,
            write_timeout: config.write_timeout,
            shutdown: ThreadedShutdown {
                requested: Arc::new(AtomicBool::new(false)),
                addr: wake_addr(local_addr),
            },
            readers: Vec::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared view of the connected peers.
    pub fn registry(&self) -> Arc<Registry<StreamPeer>> {
        Arc::clone(&self.registry)
    }

    /// Handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ThreadedShutdown {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown, then close every peer and join
    /// the reader threads.
    pub fn run(mut self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr, "threaded server listening");

        while !self.shutdown.is_requested() {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.shutdown.is_requested() {
                        break;
                    }
                    self.spawn_connection(stream, addr);
                },
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
            self.readers.retain(|reader| !reader.is_finished());
        }

        let closed = self.registry.drain();
        tracing::debug!(closed, "closed peers on shutdown");
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                tracing::error!("connection thread panicked");
            }
        }

        tracing::info!(addr = %self.local_addr, "threaded server stopped");
        Ok(())
    }

    fn spawn_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.ids.next_id();
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                tracing::warn!(%id, %addr, error = %e, "failed to clone stream");
                return;
            },
        };
        // Send timeout only; reads on the shared socket stay blocking.
        if let Err(e) = writer.set_write_timeout(Some(self.write_timeout)) {
            tracing::warn!(%id, %addr, error = %e, "failed to set write timeout");
            return;
        }

        if !self.registry.register(StreamPeer::new(id, writer)) {
            return;
        }
        tracing::info!(%id, %addr, peers = self.registry.count(), "client connected");

        let registry = Arc::clone(&self.registry);
        let buffer_size = self.buffer_size;
        let spawned = thread::Builder::new()
            .name(format!("chorus-conn-{id}"))
            .spawn(move || serve(id, stream, &registry, buffer_size));

        match spawned {
            Ok(reader) => self.readers.push(reader),
            Err(e) => {
                session::remove(&self.registry, id, Departure::Failed(e));
            },
        }
    }
}

fn serve(
    id: ConnectionId,
    mut stream: TcpStream,
    registry: &Registry<StreamPeer>,
    buffer_size: usize,
) {
    let mut buffer = ByteBuffer::new(buffer_size);
    let mut router = Router::for_read_capacity(buffer_size);

    loop {
        let fill = match buffer.fill_once(&mut stream) {
            Ok(fill) => fill,
            Err(e) => {
                session::remove(registry, id, Departure::Failed(e));
                return;
            },
        };

        if !registry.contains(id) {
            return;
        }

        let text = buffer.decode().into_owned();
        if !session::settle_read(registry, &mut router, id, fill, &text) {
            return;
        }
    }
}

/// Connectable form of the bound address.
fn wake_addr(bound: SocketAddr) -> SocketAddr {
    match bound {
        SocketAddr::V4(v4) if v4.ip().is_unspecified() => {
            SocketAddr::from((Ipv4Addr::LOCALHOST, v4.port()))
        },
        SocketAddr::V6(v6) if v6.ip().is_unspecified() => {
            SocketAddr::from((Ipv6Addr::LOCALHOST, v6.port()))
        },
        other => other,
    }
}
