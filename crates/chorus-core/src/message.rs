//! Inbound text classification.
//!
//! Whatever one read round produced is one message. The server only needs to
//! know three things about it: was it empty, was it the quit token, or is it
//! something to broadcast.

use crate::connection::ConnectionId;

/// Exact text a peer sends to leave gracefully. Case-sensitive.
pub const QUIT_TOKEN: &str = "quit";

/// A decoded text payload attributed to exactly one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: ConnectionId,
    text: String,
}

impl Message {
    /// Attribute `text` to `sender`.
    pub fn new(sender: ConnectionId, text: impl Into<String>) -> Self {
        Self { sender, text: text.into() }
    }

    /// Connection the message came from.
    pub fn sender(&self) -> ConnectionId {
        self.sender
    }

    /// Message body, without the sender prefix.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// What the server should do with one decoded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Nothing was decoded
    Empty,
    /// The peer asked to leave
    Quit,
    /// Forward to every other peer
    Broadcast(Message),
}

impl Inbound {
    /// Classify decoded text from `sender`.
    ///
    /// The quit check is an exact match: `"quit\n"` or `"QUIT"` are ordinary
    /// messages.
    pub fn classify(sender: ConnectionId, text: &str) -> Self {
        if text.is_empty() {
            Self::Empty
        } else if text == QUIT_TOKEN {
            Self::Quit
        } else {
            Self::Broadcast(Message::new(sender, text))
        }
    }
}
