//! Error types for the Chorus core.
//!
//! Socket failures stay `std::io::Error`: they are always local to one peer
//! and the caller decides whether to drop that peer. Only failures of the
//! staging logic itself get a dedicated type.

use thiserror::Error;

/// Errors from encoding text into a [`ByteBuffer`](crate::ByteBuffer).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Encoded text does not fit the buffer
    #[error("encoded message needs {needed} bytes but buffer holds {capacity}")]
    Overflow {
        /// Bytes the encoded text needs
        needed: usize,
        /// Fixed capacity of the buffer
        capacity: usize,
    },

    /// A `Display` implementation reported an error while formatting
    #[error("message formatting failed")]
    Format,
}
