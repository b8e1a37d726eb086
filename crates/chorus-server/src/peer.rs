//! Connection types for each strategy.
//!
//! All three implement [`Peer`], so the same registry and router serve the
//! readiness reactor, the completion tasks and the blocking threads.

use std::{
    borrow::Cow,
    io::{self, Write},
    net::{Shutdown, SocketAddr},
};

use bytes::{Buf, Bytes, BytesMut};
use chorus_core::{ByteBuffer, ConnectionId, Fill, Peer};
use mio::{Interest, Token, net::TcpStream};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::AbortHandle,
};

/// A connection owned by the readiness reactor.
///
/// Writes go straight to the non-blocking socket. Whatever the socket does
/// not accept yet lands in a bounded outbox that the reactor flushes on
/// write-readiness; exceeding the bound marks the peer dead.
#[derive(Debug)]
pub struct ReactorPeer {
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    read: ByteBuffer,
    outbox: BytesMut,
    max_pending: usize,
    interest: Interest,
    closed: bool,
}

impl ReactorPeer {
    /// Wrap an accepted, non-blocking stream.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        addr: SocketAddr,
        buffer_size: usize,
        max_pending: usize,
    ) -> Self {
        Self {
            id,
            stream,
            addr,
            read: ByteBuffer::new(buffer_size),
            outbox: BytesMut::new(),
            max_pending,
            interest: Interest::READABLE,
            closed: false,
        }
    }

    /// Remote address of the peer.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Multiplexer token; identical to the connection id.
    pub fn token(&self) -> Token {
        Token(self.id.get() as usize)
    }

    /// Bytes waiting for write-readiness.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Register for read-readiness.
    pub(crate) fn register(&mut self, registry: &mio::Registry) -> io::Result<()> {
        let token = self.token();
        self.interest = Interest::READABLE;
        registry.register(&mut self.stream, token, self.interest)
    }

    /// Drop the multiplexer registration. Safe to call after [`Peer::close`].
    pub(crate) fn deregister(&mut self, registry: &mio::Registry) {
        if let Err(e) = registry.deregister(&mut self.stream) {
            tracing::debug!(id = %self.id, error = %e, "deregister failed");
        }
    }

    /// Ask for write-readiness only while the outbox holds bytes.
    pub(crate) fn sync_interest(&mut self, registry: &mio::Registry) -> io::Result<()> {
        let wanted = if self.outbox.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        if wanted != self.interest {
            let token = self.token();
            registry.reregister(&mut self.stream, token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    /// Drain the socket into the read buffer.
    pub(crate) fn fill(&mut self) -> io::Result<Fill> {
        self.read.fill(&mut self.stream)
    }

    /// Text of the most recent fill.
    pub(crate) fn decoded(&self) -> Cow<'_, str> {
        self.read.decode()
    }

    /// Write as much of the outbox as the socket accepts.
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.outbox.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, rest: &[u8]) -> io::Result<()> {
        if self.outbox.len() + rest.len() > self.max_pending {
            return Err(io::Error::other(format!(
                "peer has {} bytes pending, limit is {}",
                self.outbox.len() + rest.len(),
                self.max_pending
            )));
        }
        self.outbox.extend_from_slice(rest);
        Ok(())
    }
}

impl Peer for ReactorPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&mut self, bytes: &[u8]) -> io::Result<()> {
        // Anything already queued must reach the wire first.
        if !self.outbox.is_empty() {
            self.flush()?;
            if !self.outbox.is_empty() {
                return self.enqueue(bytes);
            }
        }

        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return self.enqueue(&bytes[written..]);
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.outbox.clear();
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                tracing::trace!(id = %self.id, error = %e, "shutdown on close failed");
            }
        }
    }
}

/// A connection served by completion tasks.
///
/// Delivery queues the bytes for the connection's writer task without
/// waiting. The queue is bounded; a full queue marks the peer dead, the same
/// way the reactor treats an overflowing outbox. Closing drops the queue and
/// aborts the writer, so a writer stuck on an unread socket still lets go
/// of it.
#[derive(Debug)]
pub struct ChannelPeer {
    id: ConnectionId,
    outbound: Option<mpsc::Sender<Bytes>>,
    writer: Option<AbortHandle>,
}

impl ChannelPeer {
    /// Peer whose writer task drains `outbound`.
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Bytes>) -> Self {
        Self { id, outbound: Some(outbound), writer: None }
    }

    /// Abort `writer` when the peer is closed.
    #[must_use]
    pub fn with_writer(mut self, writer: AbortHandle) -> Self {
        self.writer = Some(writer);
        self
    }
}

impl Peer for ChannelPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&mut self, bytes: &[u8]) -> io::Result<()> {
        let outbound = self.outbound.as_ref().ok_or(io::ErrorKind::NotConnected)?;
        outbound.try_send(Bytes::copy_from_slice(bytes)).map_err(|e| match e {
            TrySendError::Full(_) => io::Error::other(format!(
                "peer has {} messages queued, limit reached",
                outbound.max_capacity()
            )),
            TrySendError::Closed(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "writer task has stopped")
            },
        })
    }

    fn close(&mut self) {
        self.outbound = None;
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

/// A connection served by its own blocking thread.
///
/// Holds a clone of the socket for writing; the reader thread keeps the
/// accepted handle. The server gives the clone a send timeout, so a receiver
/// that stops reading fails delivery instead of blocking it forever. Closing
/// shuts the socket down, which also wakes the reader.
#[derive(Debug)]
pub struct StreamPeer {
    id: ConnectionId,
    stream: std::net::TcpStream,
    closed: bool,
}

impl StreamPeer {
    /// Peer writing through `stream`.
    pub fn new(id: ConnectionId, stream: std::net::TcpStream) -> Self {
        Self { id, stream, closed: false }
    }
}

impl Peer for StreamPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn deliver(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                tracing::trace!(id = %self.id, error = %e, "shutdown on close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future,
        io::Read,
        thread,
        time::{Duration, Instant},
    };

    use tokio::sync::mpsc;

    use super::*;

    /// Reactor peer on an accepted loopback socket, plus the client end.
    fn reactor_pair(max_pending: usize) -> (ReactorPeer, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, addr) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let stream = TcpStream::from_std(accepted);
        (ReactorPeer::new(ConnectionId::new(2), stream, addr, 64, max_pending), client)
    }

    /// Deliver 1 KiB chunks numbered from zero until `stop` holds or
    /// delivery fails; returns the chunk count and the failure, if any.
    fn deliver_until(
        peer: &mut ReactorPeer,
        stop: impl Fn(&ReactorPeer) -> bool,
    ) -> (usize, Option<io::Error>) {
        let mut sent = 0;
        while !stop(peer) {
            assert!(sent < 1 << 16, "socket never pushed back");
            let chunk = [(sent % 251) as u8; 1024];
            if let Err(e) = peer.deliver(&chunk) {
                return (sent, Some(e));
            }
            sent += 1;
        }
        (sent, None)
    }

    #[test]
    fn reactor_peer_fails_past_the_pending_limit() {
        let (mut peer, _client) = reactor_pair(4096);

        let (_, failure) = deliver_until(&mut peer, |_| false);

        assert_eq!(failure.unwrap().kind(), io::ErrorKind::Other);
        assert!(peer.pending() > 0);
        assert!(peer.pending() <= 4096);
    }

    #[test]
    fn reactor_peer_flushes_queued_bytes_in_order() {
        let (mut peer, mut client) = reactor_pair(1024 * 1024);
        let (sent, failure) = deliver_until(&mut peer, |peer| peer.pending() > 0);
        assert!(failure.is_none());

        let reader = thread::spawn(move || {
            let mut got = vec![0u8; sent * 1024];
            client.read_exact(&mut got).unwrap();
            got
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while peer.pending() > 0 {
            assert!(Instant::now() < deadline, "outbox never drained");
            peer.flush().unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        let got = reader.join().unwrap();
        for (i, chunk) in got.chunks(1024).enumerate() {
            assert!(chunk.iter().all(|&b| b == (i % 251) as u8), "chunk {i} out of order");
        }
    }

    #[test]
    fn channel_peer_forwards_until_closed() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut peer = ChannelPeer::new(ConnectionId::new(3), tx);

        peer.deliver(b"3: hi").unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"3: hi"));

        peer.close();
        peer.close();
        assert_eq!(peer.deliver(b"late").unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_peer_reports_stopped_writer() {
        let (tx, rx) = mpsc::channel(4);
        let mut peer = ChannelPeer::new(ConnectionId::new(3), tx);
        drop(rx);

        assert_eq!(peer.deliver(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn full_queue_fails_delivery() {
        let (tx, mut rx) = mpsc::channel(2);
        let mut peer = ChannelPeer::new(ConnectionId::new(5), tx);

        peer.deliver(b"one").unwrap();
        peer.deliver(b"two").unwrap();
        let err = peer.deliver(b"three").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        // Nothing past the limit was queued.
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"two"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_aborts_the_writer() {
        let (tx, _rx) = mpsc::channel(1);
        let writer = tokio::spawn(future::pending::<()>());
        let mut peer =
            ChannelPeer::new(ConnectionId::new(7), tx).with_writer(writer.abort_handle());

        peer.close();

        assert!(writer.await.unwrap_err().is_cancelled());
    }
}
