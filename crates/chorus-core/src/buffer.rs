//! Fixed-capacity staging buffer between sockets and text.
//!
//! A [`ByteBuffer`] is used in half-duplex mode: it is either being filled
//! from a socket (read direction) or drained into one (write direction),
//! never both. Each direction of a connection gets its own buffer.
//!
//! ```text
//!   fill()           decode()                 encode()          write_to()
//! socket ──> [ filled bytes ] ──> text    text ──> [ bytes | drained.. ] ──> socket
//! ```
//!
//! Every `fill` and `encode` starts from a cleared buffer, so bytes from a
//! previous, unrelated message can never leak into the next decode.

use std::{
    borrow::Cow,
    fmt,
    io::{self, Read, Write},
};

use bytes::BytesMut;

use crate::error::BufferError;

/// Default capacity of one staging buffer.
pub const BUFFER_SIZE: usize = 1024;

/// Outcome of draining a socket into the buffer.
///
/// Each variant carries the number of bytes now held by the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The socket has nothing more right now. `Drained(0)` is not an error.
    Drained(usize),
    /// The buffer is full. More bytes may still be waiting on the socket.
    Full(usize),
    /// The peer closed its end of the stream.
    EndOfStream(usize),
}

impl Fill {
    /// Bytes held by the buffer after this fill.
    pub fn len(self) -> usize {
        match self {
            Self::Drained(n) | Self::Full(n) | Self::EndOfStream(n) => n,
        }
    }

    /// Whether the fill produced no bytes.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Whether the peer has closed the stream.
    pub fn is_end_of_stream(self) -> bool {
        matches!(self, Self::EndOfStream(_))
    }
}

/// Outcome of draining the buffer into a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Every byte was written.
    Complete,
    /// The writer would block; [`ByteBuffer::remaining`] holds the rest.
    Blocked,
}

/// Fixed-capacity byte buffer with a fill length and a drain cursor.
#[derive(Debug, Clone)]
pub struct ByteBuffer {
    data: BytesMut,
    capacity: usize,
    drained: usize,
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(BUFFER_SIZE)
    }
}

impl ByteBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self { data: BytesMut::with_capacity(capacity), capacity, drained: 0 }
    }

    /// Maximum number of bytes the buffer holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Every byte held, ignoring the drain cursor.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet drained by [`write_to`](Self::write_to).
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.drained..]
    }

    /// Whether any byte is still waiting to be drained.
    pub fn has_remaining(&self) -> bool {
        self.drained < self.data.len()
    }

    /// Clear content and both cursors.
    pub fn reset(&mut self) {
        self.data.clear();
        self.drained = 0;
    }

    /// Drain every currently available byte from a non-blocking source.
    ///
    /// Reads until the source reports `WouldBlock`, end-of-stream, or the
    /// buffer is full. Interrupted reads are retried. On error the partial
    /// content is kept but should be treated as lost.
    pub fn fill<R: Read>(&mut self, src: &mut R) -> io::Result<Fill> {
        self.reset();
        self.data.resize(self.capacity, 0);

        let mut filled = 0;
        let outcome = loop {
            if filled == self.capacity {
                break Ok(Fill::Full(filled));
            }

            match src.read(&mut self.data[filled..]) {
                Ok(0) => break Ok(Fill::EndOfStream(filled)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(Fill::Drained(filled)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => break Err(e),
            }
        };

        self.data.truncate(filled);
        outcome
    }

    /// Perform exactly one read, for blocking sources.
    ///
    /// A blocking read of zero bytes is end-of-stream; anything else is
    /// reported as `Drained`.
    pub fn fill_once<R: Read>(&mut self, src: &mut R) -> io::Result<Fill> {
        self.reset();
        self.data.resize(self.capacity, 0);

        let outcome = loop {
            match src.read(&mut self.data[..]) {
                Ok(0) => break Ok(Fill::EndOfStream(0)),
                Ok(n) if n == self.capacity => break Ok(Fill::Full(n)),
                Ok(n) => break Ok(Fill::Drained(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(Fill::Drained(0)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => break Err(e),
            }
        };

        let filled = outcome.as_ref().map_or(0, |fill| fill.len());
        self.data.truncate(filled);
        outcome
    }

    /// Clear the buffer and expose its whole capacity as a read target.
    ///
    /// For completion-style I/O, where the read happens outside this type:
    /// pass the slice to the read, then report the result with
    /// [`complete_read`](Self::complete_read).
    pub fn read_target(&mut self) -> &mut [u8] {
        self.reset();
        self.data.resize(self.capacity, 0);
        &mut self.data[..]
    }

    /// Record that a completed read stored `n` bytes at the start of the
    /// read target. A completion of zero bytes is end-of-stream.
    pub fn complete_read(&mut self, n: usize) -> Fill {
        let n = n.min(self.capacity);
        self.data.truncate(n);

        if n == 0 {
            Fill::EndOfStream(0)
        } else if n == self.capacity {
            Fill::Full(n)
        } else {
            Fill::Drained(n)
        }
    }

    /// Decode exactly the filled bytes as UTF-8.
    ///
    /// Invalid sequences (including a code point split across two fills) are
    /// replaced with U+FFFD rather than rejected.
    pub fn decode(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Replace the content with `text` and rewind the drain cursor.
    pub fn encode(&mut self, text: &str) -> Result<&[u8], BufferError> {
        if text.len() > self.capacity {
            return Err(BufferError::Overflow { needed: text.len(), capacity: self.capacity });
        }

        self.reset();
        self.data.extend_from_slice(text.as_bytes());
        Ok(&self.data)
    }

    /// Replace the content with formatted text and rewind the drain cursor.
    pub fn encode_fmt(&mut self, args: fmt::Arguments<'_>) -> Result<&[u8], BufferError> {
        self.reset();
        fmt::Write::write_fmt(&mut self.data, args).map_err(|_| BufferError::Format)?;

        if self.data.len() > self.capacity {
            let needed = self.data.len();
            self.reset();
            return Err(BufferError::Overflow { needed, capacity: self.capacity });
        }

        Ok(&self.data)
    }

    /// Drain the undrained bytes into `dst`, resuming after partial writes.
    ///
    /// Returns [`Flush::Blocked`] if the writer reports `WouldBlock`; calling
    /// again continues from where the last write stopped.
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<Flush> {
        while self.has_remaining() {
            match dst.write(&self.data[self.drained..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "writer accepted zero bytes",
                    ));
                },
                Ok(n) => self.drained += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }

        Ok(Flush::Complete)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Reader that replays a script of chunks, `WouldBlock`s and errors.
    enum Step {
        Data(&'static [u8]),
        Block,
        Interrupt,
        Fail,
    }

    struct Scripted(VecDeque<Step>);

    impl Scripted {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            Self(steps.into_iter().collect())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Step::Data(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.0.push_front(Step::Data(&chunk[n..]));
                    }
                    Ok(n)
                },
                Some(Step::Block) => Err(io::ErrorKind::WouldBlock.into()),
                Some(Step::Interrupt) => Err(io::ErrorKind::Interrupted.into()),
                Some(Step::Fail) => Err(io::ErrorKind::ConnectionReset.into()),
            }
        }
    }

    /// Writer that accepts at most `per_call` bytes, then blocks after
    /// `budget` calls.
    struct Trickle {
        written: Vec<u8>,
        per_call: usize,
        budget: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.budget -= 1;
            let n = buf.len().min(self.per_call);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fill_reads_until_would_block() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Data(b"hel"), Step::Data(b"lo"), Step::Block]);

        assert_eq!(buffer.fill(&mut src).unwrap(), Fill::Drained(5));
        assert_eq!(buffer.decode(), "hello");
    }

    #[test]
    fn fill_without_data_is_not_an_error() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Block]);

        let fill = buffer.fill(&mut src).unwrap();
        assert_eq!(fill, Fill::Drained(0));
        assert!(!fill.is_end_of_stream());
        assert!(buffer.is_empty());
    }

    #[test]
    fn fill_detects_end_of_stream() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Data(b"bye")]);

        let fill = buffer.fill(&mut src).unwrap();
        assert_eq!(fill, Fill::EndOfStream(3));
        assert_eq!(buffer.decode(), "bye");
    }

    #[test]
    fn fill_retries_interrupted_reads() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Interrupt, Step::Data(b"ok"), Step::Block]);

        assert_eq!(buffer.fill(&mut src).unwrap(), Fill::Drained(2));
    }

    #[test]
    fn fill_stops_when_full() {
        let mut buffer = ByteBuffer::new(4);
        let mut src = Scripted::new([Step::Data(b"abcdef"), Step::Block]);

        assert_eq!(buffer.fill(&mut src).unwrap(), Fill::Full(4));
        assert_eq!(buffer.decode(), "abcd");

        assert_eq!(buffer.fill(&mut src).unwrap(), Fill::Drained(2));
        assert_eq!(buffer.decode(), "ef");
    }

    #[test]
    fn fill_propagates_errors() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Data(b"x"), Step::Fail]);

        let err = buffer.fill(&mut src).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn refill_never_leaks_previous_bytes() {
        let mut buffer = ByteBuffer::default();

        let mut first = Scripted::new([Step::Data(b"a much longer first message"), Step::Block]);
        buffer.fill(&mut first).unwrap();

        let mut second = Scripted::new([Step::Data(b"short"), Step::Block]);
        buffer.fill(&mut second).unwrap();

        assert_eq!(buffer.decode(), "short");
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn fill_once_reads_a_single_chunk() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Data(b"one"), Step::Data(b"two")]);

        assert_eq!(buffer.fill_once(&mut src).unwrap(), Fill::Drained(3));
        assert_eq!(buffer.decode(), "one");
        assert_eq!(buffer.fill_once(&mut src).unwrap(), Fill::Drained(3));
        assert_eq!(buffer.fill_once(&mut src).unwrap(), Fill::EndOfStream(0));
    }

    #[test]
    fn completed_read_bounds_decode() {
        let mut buffer = ByteBuffer::new(8);

        buffer.read_target()[..5].copy_from_slice(b"stale");
        assert_eq!(buffer.complete_read(5), Fill::Drained(5));

        buffer.read_target()[..2].copy_from_slice(b"hi");
        assert_eq!(buffer.complete_read(2), Fill::Drained(2));
        assert_eq!(buffer.decode(), "hi");

        buffer.read_target();
        assert_eq!(buffer.complete_read(0), Fill::EndOfStream(0));
        assert!(buffer.decode().is_empty());
    }

    #[test]
    fn decode_is_lossy_on_invalid_utf8() {
        let mut buffer = ByteBuffer::default();
        let mut src = Scripted::new([Step::Data(&[b'h', 0xff, b'i']), Step::Block]);
        buffer.fill(&mut src).unwrap();

        assert_eq!(buffer.decode(), "h\u{fffd}i");
    }

    #[test]
    fn encode_rejects_oversized_text() {
        let mut buffer = ByteBuffer::new(4);

        let err = buffer.encode("too long").unwrap_err();
        assert_eq!(err, BufferError::Overflow { needed: 8, capacity: 4 });
    }

    #[test]
    fn encode_fmt_formats_and_bounds() {
        let mut buffer = ByteBuffer::new(8);

        assert_eq!(buffer.encode_fmt(format_args!("{}: {}", 7, "hi")).unwrap(), b"7: hi");

        let err = buffer.encode_fmt(format_args!("{}: {}", 7, "far too long")).unwrap_err();
        assert!(matches!(err, BufferError::Overflow { capacity: 8, .. }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn write_to_resumes_after_partial_writes() {
        let mut buffer = ByteBuffer::default();
        buffer.encode("hello world").unwrap();

        let mut dst = Trickle { written: Vec::new(), per_call: 4, budget: 2 };
        assert_eq!(buffer.write_to(&mut dst).unwrap(), Flush::Blocked);
        assert_eq!(buffer.remaining(), b"rld");

        dst.budget = 10;
        assert_eq!(buffer.write_to(&mut dst).unwrap(), Flush::Complete);
        assert_eq!(dst.written, b"hello world");
        assert!(!buffer.has_remaining());
    }

    #[test]
    fn write_to_reports_write_zero() {
        let mut buffer = ByteBuffer::default();
        buffer.encode("x").unwrap();

        let mut dst = Trickle { written: Vec::new(), per_call: 0, budget: 1 };
        let err = buffer.write_to(&mut dst).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
