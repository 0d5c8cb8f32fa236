//! # stdb-wire: Binary protocol for the subscription socket
//!
//! This crate defines the message layer spoken over the database's
//! WebSocket endpoint: the one-byte compression envelope, the client
//! message encoder, the server message decoder, and the row-list format
//! carried inside snapshots and transaction updates.
//!
//! ## Frame shape
//!
//! ```text
//! server frame  ┌──────────┬───────────────────────────────┐
//!               │ comp (1) │  payload (tag + message)      │
//!               └──────────┴───────────────────────────────┘
//! client frame  ┌─────┬─────────────────────────┐
//!               │ tag │  payload product        │
//!               └─────┴─────────────────────────┘
//! ```
//!
//! Payloads are BSATN (see `stdb-types`): little-endian, u32 length
//! prefixes, u8 sum tags.
//!
//! ## Error posture
//!
//! Nothing in this crate is connection-fatal. Decode failures are typed so
//! the transport can log precisely, drop the frame, and keep reading. The
//! single hard error inside a message is a structurally invalid row list
//! (an offset pointing outside its blob), which poisons the containing
//! message only.

mod client_message;
mod envelope;
mod error;
mod row_list;
mod server_message;

pub use client_message::{ClientMessage, UNSUBSCRIBE_FLAG_SEND_DROPPED_ROWS};
pub use envelope::{
    strip_envelope, Compression, COMPRESSION_BROTLI, COMPRESSION_GZIP, COMPRESSION_NONE,
};
pub use error::{WireError, WireResult};
pub use row_list::{decode_record, BsatnRowList, RowSizeHint};
pub use server_message::{
    ConnectionId, Identity, ProcedureStatus, QueryRows, QuerySetUpdate, ReducerOutcome,
    ServerMessage, SingleTableRows, TableUpdate, TableUpdateRows, TransactionUpdate,
    CONNECTION_ID_LENGTH, IDENTITY_LENGTH,
};
