//! Client error types.

use stdb_types::{EncodeError, SchemaError};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by caller-facing client operations.
///
/// Transport-level trouble (socket drops, frame decode failures) never
/// surfaces here; it is reported through the observer while the connection
/// recovers on its own.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The schema endpoint answered with a non-success status.
    #[error("schema fetch failed with status {status}: {body}")]
    SchemaFetch { status: u16, body: String },

    /// The schema request itself failed.
    #[error("schema request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The schema document did not parse.
    #[error("schema parse failed: {0}")]
    Schema(#[from] SchemaError),

    /// Reducer arguments did not encode against the parameter list.
    #[error("argument encoding failed: {0}")]
    Encode(#[from] EncodeError),

    /// The named reducer is not part of the schema.
    #[error("unknown reducer: {0}")]
    UnknownReducer(String),

    /// The connection task is gone; the client has been shut down.
    #[error("connection closed")]
    ConnectionClosed,
}
