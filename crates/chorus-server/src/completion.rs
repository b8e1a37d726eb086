//! Completion-driven strategy on a tokio runtime.
//!
//! Every connection gets a reader task and a writer task. The reader owns
//! the read half and a private router; the writer drains the connection's
//! outbound channel into the write half. The registry holds the channel
//! senders, so broadcasting never waits on a slow socket. Each channel is
//! bounded by the pending byte budget; a peer that lets it fill is removed.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use chorus_core::{ByteBuffer, ConnectionId, IdAllocator, Registry, Router};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc::{self, Receiver},
    task::JoinSet,
};

use crate::{
    config::ServerConfig,
    error::ServerError,
    peer::ChannelPeer,
    session::{self, Departure},
};

/// Broadcast server driven by async completions.
#[derive(Debug)]
pub struct CompletionServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry<ChannelPeer>>,
    ids: IdAllocator,
    buffer_size: usize,
    queue_depth: usize,
    tasks: JoinSet<()>,
}

impl CompletionServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` if the configuration is invalid
    /// - `ServerError::Bind` if the address cannot be bound
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let listener =
            TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(Registry::new()),
            ids: IdAllocator::default(),
            buffer_size: config.buffer_size,
            queue_depth: config.queue_depth(),
            tasks: JoinSet::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared view of the connected peers.
    pub fn registry(&self) -> Arc<Registry<ChannelPeer>> {
        Arc::clone(&self.registry)
    }

    /// Accept and serve connections until `shutdown` resolves.
    ///
    /// On return every connection task has been stopped and every peer
    /// closed.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.local_addr, "completion server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_connection(stream, addr),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    // Writers of closed peers end cancelled.
                    if let Some(e) = joined.err().filter(|e| e.is_panic()) {
                        tracing::error!(error = %e, "connection task failed");
                    }
                },
            }
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        let closed = self.registry.drain();
        tracing::info!(addr = %self.local_addr, closed, "completion server stopped");
        Ok(())
    }

    fn spawn_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.ids.next_id();
        let (reader, writer) = stream.into_split();
        let (outbound, queued) = mpsc::channel(self.queue_depth);

        // The writer only waits on its queue, so it can start before the
        // peer is visible to broadcasts.
        let writer = self.tasks.spawn(write_loop(id, writer, queued));
        if !self.registry.register(ChannelPeer::new(id, outbound).with_writer(writer)) {
            return;
        }
        tracing::info!(%id, %addr, peers = self.registry.count(), "client connected");

        self.tasks.spawn(read_loop(id, reader, Arc::clone(&self.registry), self.buffer_size));
    }
}

async fn read_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    registry: Arc<Registry<ChannelPeer>>,
    buffer_size: usize,
) {
    let mut buffer = ByteBuffer::new(buffer_size);
    let mut router = Router::for_read_capacity(buffer_size);

    loop {
        let fill = match reader.read(buffer.read_target()).await {
            Ok(n) => buffer.complete_read(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                session::remove(&registry, id, Departure::Failed(e));
                return;
            },
        };

        // Removed by a failed broadcast from another connection.
        if !registry.contains(id) {
            return;
        }

        let text = buffer.decode().into_owned();
        if !session::settle_read(&registry, &mut router, id, fill, &text) {
            return;
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: OwnedWriteHalf,
    mut queued: Receiver<Bytes>,
) {
    while let Some(bytes) = queued.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            tracing::debug!(%id, error = %e, "write failed");
            return;
        }
    }

    // Queue closed without an abort: finish the write half in order.
    if let Err(e) = writer.shutdown().await {
        tracing::trace!(%id, error = %e, "write shutdown failed");
    }
}
