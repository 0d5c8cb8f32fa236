//! Client → server protocol messages.
//!
//! Each message is a u8 tag followed by its payload product. Client frames
//! carry no compression envelope.

use bytes::{BufMut, Bytes, BytesMut};

use stdb_types::bsatn::{write_bytes, write_string};

/// Unsubscribe flag: server should send the rows dropped by the
/// unsubscription in the acknowledgment.
pub const UNSUBSCRIBE_FLAG_SEND_DROPPED_ROWS: u8 = 1;

const TAG_SUBSCRIBE: u8 = 0;
const TAG_UNSUBSCRIBE: u8 = 1;
const TAG_ONE_OFF_QUERY: u8 = 2;
const TAG_CALL_REDUCER: u8 = 3;
const TAG_CALL_PROCEDURE: u8 = 4;

/// A message sent by the client.
///
/// Every variant carries a `request_id` and is answered by exactly one
/// server message bearing the same id.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Register a set of queries under a fresh query-set id.
    Subscribe {
        request_id: u32,
        query_set_id: u32,
        queries: Vec<String>,
    },
    /// Drop a previously registered query set.
    Unsubscribe {
        request_id: u32,
        query_set_id: u32,
        flags: u8,
    },
    /// Run a one-shot query outside any subscription.
    OneOffQuery { request_id: u32, query: String },
    /// Invoke a reducer. `args` is the pre-encoded argument product.
    CallReducer {
        request_id: u32,
        flags: u8,
        reducer: String,
        args: Bytes,
    },
    /// Invoke a procedure. `args` is the pre-encoded argument product.
    CallProcedure {
        request_id: u32,
        flags: u8,
        procedure: String,
        args: Bytes,
    },
}

impl ClientMessage {
    /// The request id this message expects its response to carry.
    pub fn request_id(&self) -> u32 {
        match self {
            ClientMessage::Subscribe { request_id, .. }
            | ClientMessage::Unsubscribe { request_id, .. }
            | ClientMessage::OneOffQuery { request_id, .. }
            | ClientMessage::CallReducer { request_id, .. }
            | ClientMessage::CallProcedure { request_id, .. } => *request_id,
        }
    }

    /// Encodes the message to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            ClientMessage::Subscribe {
                request_id,
                query_set_id,
                queries,
            } => {
                buf.put_u8(TAG_SUBSCRIBE);
                buf.put_u32_le(*request_id);
                buf.put_u32_le(*query_set_id);
                buf.put_u32_le(queries.len() as u32);
                for query in queries {
                    write_string(&mut buf, query);
                }
            }
            ClientMessage::Unsubscribe {
                request_id,
                query_set_id,
                flags,
            } => {
                buf.put_u8(TAG_UNSUBSCRIBE);
                buf.put_u32_le(*request_id);
                buf.put_u32_le(*query_set_id);
                buf.put_u8(*flags);
            }
            ClientMessage::OneOffQuery { request_id, query } => {
                buf.put_u8(TAG_ONE_OFF_QUERY);
                buf.put_u32_le(*request_id);
                write_string(&mut buf, query);
            }
            ClientMessage::CallReducer {
                request_id,
                flags,
                reducer,
                args,
            } => {
                buf.put_u8(TAG_CALL_REDUCER);
                buf.put_u32_le(*request_id);
                buf.put_u8(*flags);
                write_string(&mut buf, reducer);
                write_bytes(&mut buf, args);
            }
            ClientMessage::CallProcedure {
                request_id,
                flags,
                procedure,
                args,
            } => {
                buf.put_u8(TAG_CALL_PROCEDURE);
                buf.put_u32_le(*request_id);
                buf.put_u8(*flags);
                write_string(&mut buf, procedure);
                write_bytes(&mut buf, args);
            }
        }
        buf.freeze()
    }
}
