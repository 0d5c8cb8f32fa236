//! Server → client protocol messages.
//!
//! After the compression envelope is stripped, the first payload byte is a
//! message tag. Unknown tags at any level decode to a typed error; the
//! transport drops the frame and keeps the connection.

use std::fmt::{self, Display};

use bytes::Bytes;

use stdb_types::bsatn::Decoder;
use stdb_types::DecodeError;

use crate::error::{WireError, WireResult};
use crate::row_list::BsatnRowList;

/// Byte length of a negotiated identity.
pub const IDENTITY_LENGTH: usize = 32;

/// Byte length of a connection id.
pub const CONNECTION_ID_LENGTH: usize = 16;

const TAG_INITIAL_CONNECTION: u8 = 0;
const TAG_SUBSCRIBE_APPLIED: u8 = 1;
const TAG_UNSUBSCRIBE_APPLIED: u8 = 2;
const TAG_SUBSCRIPTION_ERROR: u8 = 3;
const TAG_TRANSACTION_UPDATE: u8 = 4;
const TAG_ONE_OFF_QUERY_RESULT: u8 = 5;
const TAG_REDUCER_RESULT: u8 = 6;
const TAG_PROCEDURE_RESULT: u8 = 7;

// ============================================================================
// Identity
// ============================================================================

/// The server-assigned identity of this client (opaque 32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity([u8; IDENTITY_LENGTH]);

impl Identity {
    pub fn from_bytes(bytes: [u8; IDENTITY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LENGTH] {
        &self.0
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// The server-assigned id of this connection (opaque 16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId([u8; CONNECTION_ID_LENGTH]);

impl ConnectionId {
    pub fn from_bytes(bytes: [u8; CONNECTION_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONNECTION_ID_LENGTH] {
        &self.0
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Sub-structures
// ============================================================================

/// Rows for one table inside a query result or snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleTableRows {
    pub table: String,
    pub rows: BsatnRowList,
}

/// Rows grouped by table.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRows {
    pub tables: Vec<SingleTableRows>,
}

/// Row batches for one table inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TableUpdateRows {
    /// Committed deletes and inserts, to be mirrored by the cache.
    Persistent {
        inserts: BsatnRowList,
        deletes: BsatnRowList,
    },
    /// Ephemeral event rows; never cached.
    Event { events: BsatnRowList },
}

/// All row batches for one table inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUpdate {
    pub table_name: String,
    pub rows: Vec<TableUpdateRows>,
}

/// Per-query-set slice of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySetUpdate {
    pub query_set_id: u32,
    pub tables: Vec<TableUpdate>,
}

/// A committed change pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionUpdate {
    pub query_sets: Vec<QuerySetUpdate>,
}

/// Outcome of a reducer invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReducerOutcome {
    /// The reducer ran and returned a value plus the transaction it caused.
    Ok { ret: Bytes, tx: TransactionUpdate },
    /// The reducer ran and produced nothing to report.
    OkEmpty,
    /// The reducer rejected the call.
    Err(Bytes),
    /// The server failed internally before the reducer completed.
    InternalError(String),
}

/// Outcome of a procedure invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcedureStatus {
    Returned(Bytes),
    InternalError(String),
}

// ============================================================================
// Server message
// ============================================================================

/// A message received from the server, decoded from a decompressed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// First frame after the handshake; carries the negotiated identity.
    InitialConnection {
        identity: Identity,
        connection_id: ConnectionId,
        token: String,
    },
    /// A subscription is live; `rows` is the initial snapshot.
    SubscribeApplied {
        request_id: u32,
        query_set_id: u32,
        rows: QueryRows,
    },
    /// An unsubscription completed; `rows` are the dropped rows, when
    /// requested.
    UnsubscribeApplied {
        request_id: u32,
        query_set_id: u32,
        rows: Option<QueryRows>,
    },
    /// A subscription failed, at registration (`request_id` present) or
    /// later (absent).
    SubscriptionError {
        request_id: Option<u32>,
        query_set_id: u32,
        error: String,
    },
    /// A committed transaction touching subscribed queries.
    TransactionUpdate(TransactionUpdate),
    /// Result of a one-off query.
    OneOffQueryResult {
        request_id: u32,
        result: Result<QueryRows, String>,
    },
    /// Result of a reducer call.
    ReducerResult {
        request_id: u32,
        timestamp_ns: i64,
        outcome: ReducerOutcome,
    },
    /// Result of a procedure call.
    ProcedureResult {
        status: ProcedureStatus,
        timestamp_ns: i64,
        duration_ns: i64,
        request_id: u32,
    },
}

impl ServerMessage {
    /// The request id this message answers, if it answers one.
    ///
    /// `TransactionUpdate` and `InitialConnection` are unsolicited; a
    /// `SubscriptionError` may or may not carry one.
    pub fn request_id(&self) -> Option<u32> {
        match self {
            ServerMessage::SubscribeApplied { request_id, .. }
            | ServerMessage::UnsubscribeApplied { request_id, .. }
            | ServerMessage::OneOffQueryResult { request_id, .. }
            | ServerMessage::ReducerResult { request_id, .. }
            | ServerMessage::ProcedureResult { request_id, .. } => Some(*request_id),
            ServerMessage::SubscriptionError { request_id, .. } => *request_id,
            ServerMessage::InitialConnection { .. } | ServerMessage::TransactionUpdate(_) => None,
        }
    }

    /// Decodes a server message from a decompressed payload.
    pub fn decode(payload: Bytes) -> WireResult<Self> {
        let mut dec = Decoder::new(payload);
        let tag = dec.read_u8()?;
        match tag {
            TAG_INITIAL_CONNECTION => {
                let identity = Identity::from_bytes(dec.read_byte_array()?);
                let connection_id = ConnectionId::from_bytes(dec.read_byte_array()?);
                let token = dec.read_string()?;
                Ok(ServerMessage::InitialConnection {
                    identity,
                    connection_id,
                    token,
                })
            }
            TAG_SUBSCRIBE_APPLIED => Ok(ServerMessage::SubscribeApplied {
                request_id: dec.read_u32()?,
                query_set_id: dec.read_u32()?,
                rows: decode_query_rows(&mut dec)?,
            }),
            TAG_UNSUBSCRIBE_APPLIED => {
                let request_id = dec.read_u32()?;
                let query_set_id = dec.read_u32()?;
                let rows = match dec.read_u8()? {
                    0 => Some(decode_query_rows(&mut dec)?),
                    1 => None,
                    other => return Err(DecodeError::InvalidOptionTag(other).into()),
                };
                Ok(ServerMessage::UnsubscribeApplied {
                    request_id,
                    query_set_id,
                    rows,
                })
            }
            TAG_SUBSCRIPTION_ERROR => Ok(ServerMessage::SubscriptionError {
                request_id: dec.read_option_u32()?,
                query_set_id: dec.read_u32()?,
                error: dec.read_string()?,
            }),
            TAG_TRANSACTION_UPDATE => Ok(ServerMessage::TransactionUpdate(
                decode_transaction_update(&mut dec)?,
            )),
            TAG_ONE_OFF_QUERY_RESULT => {
                let request_id = dec.read_u32()?;
                let result = match dec.read_u8()? {
                    0 => Ok(decode_query_rows(&mut dec)?),
                    1 => Err(dec.read_string()?),
                    tag => {
                        return Err(unknown_variant(tag, "one-off query result"));
                    }
                };
                Ok(ServerMessage::OneOffQueryResult { request_id, result })
            }
            TAG_REDUCER_RESULT => {
                let request_id = dec.read_u32()?;
                let timestamp_ns = dec.read_i64()?;
                let outcome = decode_reducer_outcome(&mut dec)?;
                Ok(ServerMessage::ReducerResult {
                    request_id,
                    timestamp_ns,
                    outcome,
                })
            }
            TAG_PROCEDURE_RESULT => {
                let status = match dec.read_u8()? {
                    0 => ProcedureStatus::Returned(dec.read_bytes()?),
                    1 => ProcedureStatus::InternalError(dec.read_string()?),
                    tag => return Err(unknown_variant(tag, "procedure status")),
                };
                Ok(ServerMessage::ProcedureResult {
                    status,
                    timestamp_ns: dec.read_i64()?,
                    duration_ns: dec.read_i64()?,
                    request_id: dec.read_u32()?,
                })
            }
            other => Err(WireError::UnknownMessageTag(other)),
        }
    }
}

fn decode_query_rows(dec: &mut Decoder) -> WireResult<QueryRows> {
    let count = dec.read_count()? as usize;
    let mut tables = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let table = dec.read_string()?;
        let rows = BsatnRowList::decode(dec)?;
        tables.push(SingleTableRows { table, rows });
    }
    Ok(QueryRows { tables })
}

fn decode_transaction_update(dec: &mut Decoder) -> WireResult<TransactionUpdate> {
    let count = dec.read_count()? as usize;
    let mut query_sets = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let query_set_id = dec.read_u32()?;
        let table_count = dec.read_count()? as usize;
        let mut tables = Vec::with_capacity(table_count.min(4096));
        for _ in 0..table_count {
            tables.push(decode_table_update(dec)?);
        }
        query_sets.push(QuerySetUpdate {
            query_set_id,
            tables,
        });
    }
    Ok(TransactionUpdate { query_sets })
}

fn decode_table_update(dec: &mut Decoder) -> WireResult<TableUpdate> {
    let table_name = dec.read_string()?;
    let count = dec.read_count()? as usize;
    let mut rows = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        rows.push(match dec.read_u8()? {
            0 => TableUpdateRows::Persistent {
                inserts: BsatnRowList::decode(dec)?,
                deletes: BsatnRowList::decode(dec)?,
            },
            1 => TableUpdateRows::Event {
                events: BsatnRowList::decode(dec)?,
            },
            tag => return Err(unknown_variant(tag, "table update rows")),
        });
    }
    Ok(TableUpdate { table_name, rows })
}

fn decode_reducer_outcome(dec: &mut Decoder) -> WireResult<ReducerOutcome> {
    Ok(match dec.read_u8()? {
        0 => ReducerOutcome::Ok {
            ret: dec.read_bytes()?,
            tx: decode_transaction_update(dec)?,
        },
        1 => ReducerOutcome::OkEmpty,
        2 => ReducerOutcome::Err(dec.read_bytes()?),
        3 => ReducerOutcome::InternalError(dec.read_string()?),
        tag => return Err(unknown_variant(tag, "reducer outcome")),
    })
}

fn unknown_variant(tag: u8, what: &str) -> WireError {
    DecodeError::UnknownVariantTag {
        tag,
        what: what.to_string(),
    }
    .into()
}
