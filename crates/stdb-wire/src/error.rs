//! Wire protocol error types.

use stdb_types::DecodeError;
use thiserror::Error;

/// Result type for wire protocol operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing or decoding protocol messages.
///
/// None of these are connection-fatal: the transport logs the error, drops
/// the offending frame, and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// BSATN-level decode failure inside a message payload.
    #[error("payload decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The first payload byte named no server message.
    #[error("unknown server message tag: {0:#04x}")]
    UnknownMessageTag(u8),

    /// The envelope byte named no compression scheme.
    #[error("unknown compression tag: {0:#04x}")]
    UnknownCompression(u8),

    /// The envelope named a scheme this client does not decompress.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(&'static str),

    /// The compressed payload failed to inflate.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// A frame arrived with no envelope byte at all.
    #[error("empty frame")]
    EmptyFrame,

    /// A row-list offset pointed past the end of the row data.
    #[error("row offset {offset} out of range for {len} bytes of row data")]
    RowOffsetOutOfRange { offset: u64, len: usize },

    /// Row-list offsets were not nondecreasing.
    #[error("row offsets decrease at index {index}")]
    RowOffsetsNotMonotonic { index: usize },
}
