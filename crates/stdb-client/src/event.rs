//! Observer interface and event payloads.
//!
//! Callbacks are a single trait with defaulted no-op methods; implement the
//! ones you care about. All callbacks run on the client's dispatch task, in
//! server order, after the cache already reflects the triggering message,
//! so reading the cache from a callback observes post-transaction state.

use stdb_types::Row;
use stdb_wire::{ConnectionId, Identity, ProcedureStatus, ReducerOutcome};

/// Whether per-row callbacks should fire for a transaction.
///
/// Returned by [`ClientObserver::on_transaction`]; `Suppress` skips the
/// insert/delete/update callbacks for that transaction only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowDispatch {
    #[default]
    Deliver,
    Suppress,
}

/// Decoded deletes and inserts for one table within a transaction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableChanges {
    pub table: String,
    pub deletes: Vec<Row>,
    pub inserts: Vec<Row>,
}

/// All decoded changes of one transaction, grouped by table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransactionChanges {
    pub tables: Vec<TableChanges>,
}

/// Decoded rows of one table in a one-off query result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResultRows {
    pub table: String,
    pub rows: Vec<Row>,
}

/// Client event callbacks. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait ClientObserver: Send + Sync {
    /// The connection negotiated; identity and token are now known.
    fn on_connect(&self, identity: &Identity, connection_id: &ConnectionId, token: &str) {}

    /// A subscription snapshot was applied; fires once per table.
    fn on_subscribe_applied(&self, query_set_id: u32, table: &str, rows: &[Row]) {}

    /// An unsubscription was acknowledged.
    fn on_unsubscribe_applied(&self, request_id: u32, query_set_id: u32) {}

    /// The server rejected a subscription.
    fn on_subscription_error(&self, request_id: Option<u32>, query_set_id: u32, error: &str) {}

    /// A transaction was applied to the cache. Return
    /// [`RowDispatch::Suppress`] to skip the per-row callbacks below.
    fn on_transaction(&self, changes: &TransactionChanges) -> RowDispatch {
        RowDispatch::Deliver
    }

    /// A row appeared that matches no deleted primary key.
    fn on_insert(&self, table: &str, row: &Row) {}

    /// A row disappeared and no insert shares its primary key.
    fn on_delete(&self, table: &str, row: &Row) {}

    /// A delete and an insert shared a primary key: the row changed.
    fn on_update(&self, table: &str, old: &Row, new: &Row) {}

    /// A reducer call completed.
    fn on_reducer_result(&self, request_id: u32, timestamp_ns: i64, outcome: &ReducerOutcome) {}

    /// A procedure call completed.
    fn on_procedure_result(
        &self,
        request_id: u32,
        timestamp_ns: i64,
        duration_ns: i64,
        status: &ProcedureStatus,
    ) {
    }

    /// A one-off query completed.
    fn on_query_result(&self, request_id: u32, result: &Result<Vec<QueryResultRows>, String>) {}

    /// A request was dropped without a response (disconnect or shutdown).
    fn on_request_aborted(&self, request_id: u32) {}

    /// The connection dropped; `attempt` counts consecutive failures.
    fn on_disconnect(&self, reason: &str, attempt: u32) {}

    /// Reconnection attempts are exhausted; the client stays disconnected.
    fn on_connection_failed(&self) {}
}

/// An observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}
