//! Console input forwarder.
//!
//! Runs on its own thread: reads lines from the console and writes them to
//! the server. It is the only writer on the socket, and it owns a buffer
//! separate from the reactor's read buffer.

use std::{
    io::{self, BufRead},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use chorus_core::{ByteBuffer, Flush, QUIT_TOKEN};
use mio::{Waker, net::TcpStream};

/// Quit request shared between the forwarder and the reactor.
#[derive(Debug, Clone)]
pub struct QuitSignal {
    requested: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl QuitSignal {
    pub(crate) fn new(waker: Waker) -> Self {
        Self { requested: Arc::new(AtomicBool::new(false)), waker: Arc::new(waker) }
    }

    /// Mark the session as ending; an end of stream seen afterwards is
    /// treated as the reply to our own quit.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Mark the session as ending and wake the reactor.
    pub fn raise(&self) {
        self.request();
        if let Err(e) = self.waker.wake() {
            tracing::warn!(error = %e, "failed to wake reactor");
        }
    }

    /// Whether quit has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Forwards console lines to the server until quit or end of input.
#[derive(Debug)]
pub(crate) struct Forwarder<R> {
    input: R,
    stream: Arc<TcpStream>,
    buffer: ByteBuffer,
    signal: QuitSignal,
}

impl<R: BufRead> Forwarder<R> {
    pub(crate) fn new(
        input: R,
        stream: Arc<TcpStream>,
        buffer_size: usize,
        signal: QuitSignal,
    ) -> Self {
        Self { input, stream, buffer: ByteBuffer::new(buffer_size), signal }
    }

    /// Forward lines until `quit`, end of input, or a failed write.
    ///
    /// Always raises the quit signal before returning so the reactor stops.
    pub(crate) fn run(mut self) {
        if let Err(e) = self.forward_lines() {
            tracing::warn!(error = %e, "input forwarding stopped");
        }
        self.signal.raise();
    }

    fn forward_lines(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                tracing::debug!("end of input");
                return Ok(());
            }

            let text = line.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                continue;
            }

            if text == QUIT_TOKEN {
                self.signal.request();
                return self.send(text);
            }
            self.send(text)?;
        }
    }

    /// Send `text`, split into buffer-sized pieces when it does not fit.
    fn send(&mut self, text: &str) -> io::Result<()> {
        let mut rest = text;
        while !rest.is_empty() {
            let (piece, tail) = rest.split_at(piece_len(rest, self.buffer.capacity()));
            self.send_piece(piece)?;
            rest = tail;
        }
        Ok(())
    }

    fn send_piece(&mut self, text: &str) -> io::Result<()> {
        if let Err(e) = self.buffer.encode(text) {
            tracing::warn!(error = %e, "piece not sent");
            return Ok(());
        }

        let mut socket: &TcpStream = &self.stream;
        while self.buffer.write_to(&mut socket)? == Flush::Blocked {
            thread::yield_now();
        }
        self.buffer.reset();
        Ok(())
    }
}

/// Length of the longest prefix of `text` that fits in `capacity` bytes
/// without splitting a character. A character wider than `capacity` is
/// taken whole.
fn piece_len(text: &str, capacity: usize) -> usize {
    let mut end = capacity.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    if end == 0 {
        end = text.chars().next().map_or(text.len(), char::len_utf8);
    }
    end
}
