//! Client readiness loop.
//!
//! The reactor owns the receive side: it finishes the non-blocking connect,
//! then prints every message the server sends. Sending happens on the
//! input forwarder thread, which is started once the connection is up.

use std::{
    io::{self, BufRead, Write},
    net::{Shutdown, SocketAddr},
    sync::Arc,
    thread,
};

use chorus_core::{ByteBuffer, Fill};
use mio::{Events, Interest, Poll, Token, Waker, net::TcpStream};

use crate::{
    config::ClientConfig,
    error::ClientError,
    forwarder::{Forwarder, QuitSignal},
};

const SERVER: Token = Token(0);
const WAKER: Token = Token(1);
const EVENTS_CAPACITY: usize = 16;

/// Connection phase of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Waiting for the non-blocking connect to complete
    Connecting,
    /// Connected; printing messages and forwarding input
    Connected,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// The user sent `quit` or closed the console
    Quit,
    /// The server closed the connection or it failed
    ServerClosed,
}

impl ClientExit {
    /// Process exit status for this outcome.
    pub fn code(self) -> u8 {
        match self {
            Self::Quit => 0,
            Self::ServerClosed => 1,
        }
    }
}

#[derive(Debug)]
enum Link {
    Connecting(TcpStream),
    Connected(Arc<TcpStream>),
}

/// Readiness-driven chat client writing received messages to `W`.
#[derive(Debug)]
pub struct ClientReactor<W> {
    poll: Poll,
    events: Events,
    link: Option<Link>,
    addr: SocketAddr,
    read: ByteBuffer,
    output: W,
    signal: QuitSignal,
}

impl<W: Write> ClientReactor<W> {
    /// Start a non-blocking connect to the configured server.
    ///
    /// # Errors
    ///
    /// - `ClientError::Config` if the address cannot be resolved
    /// - `ClientError::Connect` if the connect cannot be started
    /// - `ClientError::Poll` if the multiplexer cannot be created
    pub fn connect(config: &ClientConfig, output: W) -> Result<Self, ClientError> {
        let addr = config.socket_addr()?;

        let poll = Poll::new().map_err(ClientError::Poll)?;
        let mut stream =
            TcpStream::connect(addr).map_err(|source| ClientError::Connect { addr, source })?;
        poll.registry()
            .register(&mut stream, SERVER, Interest::WRITABLE)
            .map_err(ClientError::Poll)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ClientError::Poll)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            link: Some(Link::Connecting(stream)),
            addr,
            read: ByteBuffer::new(config.buffer_size),
            output,
            signal: QuitSignal::new(waker),
        })
    }

    /// Current connection phase.
    pub fn state(&self) -> ClientState {
        match self.link {
            Some(Link::Connected(_)) => ClientState::Connected,
            _ => ClientState::Connecting,
        }
    }

    /// Signal that ends the session from another thread.
    pub fn quit_signal(&self) -> QuitSignal {
        self.signal.clone()
    }

    /// Run the session, forwarding lines from `input` once connected.
    ///
    /// Returns when the user quits or the server goes away. The socket is
    /// shut down on return; the forwarder thread is left to finish on its
    /// own since it may be blocked on console input.
    ///
    /// # Errors
    ///
    /// - `ClientError::Connect` if the connection attempt fails
    /// - `ClientError::Poll` if waiting on the multiplexer fails
    pub fn run<R>(mut self, input: R) -> Result<ClientExit, ClientError>
    where
        R: BufRead + Send + 'static,
    {
        let mut input = Some(input);
        let outcome = self.event_loop(&mut input);

        if let Some(Link::Connected(stream)) = self.link.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                tracing::debug!(error = %e, "shutdown failed");
            }
        }
        outcome
    }

    fn event_loop<R>(&mut self, input: &mut Option<R>) -> Result<ClientExit, ClientError>
    where
        R: BufRead + Send + 'static,
    {
        loop {
            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ClientError::Poll(e));
            }

            let tokens: Vec<Token> = self.events.iter().map(mio::event::Event::token).collect();
            for token in tokens {
                match token {
                    WAKER if self.signal.is_requested() => return Ok(ClientExit::Quit),
                    SERVER => match self.state() {
                        ClientState::Connecting => {
                            if self.finish_connect()? {
                                self.start_forwarder(input)?;
                            }
                        },
                        ClientState::Connected => {
                            if let Some(exit) = self.on_readable() {
                                return Ok(exit);
                            }
                        },
                    },
                    _ => {},
                }
            }
        }
    }

    /// Returns `true` once the handshake has completed.
    fn finish_connect(&mut self) -> Result<bool, ClientError> {
        let addr = self.addr;
        let mut stream = match self.link.take() {
            Some(Link::Connecting(stream)) => stream,
            other => {
                self.link = other;
                return Ok(false);
            },
        };

        let pending = match stream.take_error() {
            Ok(Some(source)) | Err(source) => return Err(ClientError::Connect { addr, source }),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => false,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => true,
                Err(source) => return Err(ClientError::Connect { addr, source }),
            },
        };

        if pending {
            self.link = Some(Link::Connecting(stream));
            return Ok(false);
        }

        self.poll
            .registry()
            .reregister(&mut stream, SERVER, Interest::READABLE)
            .map_err(ClientError::Poll)?;
        self.link = Some(Link::Connected(Arc::new(stream)));
        tracing::info!(%addr, "connected");
        Ok(true)
    }

    fn start_forwarder<R>(&mut self, input: &mut Option<R>) -> Result<(), ClientError>
    where
        R: BufRead + Send + 'static,
    {
        let (Some(Link::Connected(stream)), Some(input)) = (&self.link, input.take()) else {
            return Ok(());
        };

        let forwarder =
            Forwarder::new(input, Arc::clone(stream), self.read.capacity(), self.signal.clone());
        thread::Builder::new().name("chorus-input".to_string()).spawn(move || forwarder.run())?;
        Ok(())
    }

    /// Drain the socket and print what arrived. Returns the exit reason once
    /// the session is over.
    fn on_readable(&mut self) -> Option<ClientExit> {
        let Some(Link::Connected(stream)) = &self.link else {
            return None;
        };
        let mut socket: &TcpStream = stream;

        loop {
            let fill = match self.read.fill(&mut socket) {
                Ok(fill) => fill,
                Err(e) => {
                    tracing::warn!(error = %e, "read failed");
                    return Some(self.closed_exit());
                },
            };

            if !fill.is_empty() {
                let text = self.read.decode();
                if let Err(e) = writeln!(self.output, "{text}").and_then(|()| self.output.flush()) {
                    tracing::warn!(error = %e, "cannot write to output");
                }
            }

            match fill {
                Fill::Full(_) => {},
                Fill::Drained(_) => return None,
                Fill::EndOfStream(_) => return Some(self.closed_exit()),
            }
        }
    }

    fn closed_exit(&self) -> ClientExit {
        if self.signal.is_requested() { ClientExit::Quit } else { ClientExit::ServerClosed }
    }
}
