//! The client façade: schema, connection, cache, and event dispatch.
//!
//! [`Client::start`] fetches the schema over HTTP, builds the table mirror,
//! spawns the connection task, and spawns a dispatch task that turns
//! decoded server messages into cache mutations and observer callbacks.
//!
//! # Ordering
//!
//! Server messages are dispatched in arrival order. For any message that
//! mutates the cache, every mutation lands before the first callback for
//! that message fires, so callbacks reading the cache observe the state
//! after the triggering transaction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use stdb_types::{encode_reducer_args, Row, Schema, Value};
use stdb_wire::{
    ConnectionId, Identity, QueryRows, ReducerOutcome, ServerMessage, TableUpdateRows,
    TransactionUpdate, WireResult,
};

use crate::cache::Cache;
use crate::config::ClientConfig;
use crate::connection::{self, Command, ConnectionEvent};
use crate::error::{ClientError, ClientResult};
use crate::event::{
    ClientObserver, QueryResultRows, RowDispatch, TableChanges, TransactionChanges,
};
use crate::http;

const COMMAND_CHANNEL_CAPACITY: usize = 32;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identity negotiated on the most recent connection.
#[derive(Default)]
struct NegotiatedState {
    identity: RwLock<Option<Identity>>,
    connection_id: RwLock<Option<ConnectionId>>,
    token: RwLock<Option<String>>,
}

/// A connected client.
///
/// Cheap reads (`get_all`, `find`, `count`) are served from the local
/// mirror synchronously; everything that touches the socket is async and
/// applies backpressure through a bounded channel.
pub struct Client {
    schema: Arc<Schema>,
    cache: Arc<Cache>,
    commands: mpsc::Sender<Command>,
    negotiated: Arc<NegotiatedState>,
    connection: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl Client {
    /// Fetches the schema, starts the connection, and begins dispatching.
    ///
    /// Configured subscriptions are registered automatically once the
    /// server acknowledges the connection.
    pub async fn start(
        config: ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> ClientResult<Self> {
        let schema = Arc::new(http::fetch_schema(&config).await?);
        let cache = Arc::new(Cache::from_schema(&schema));
        let negotiated = Arc::new(NegotiatedState::default());

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let subscriptions = config.subscriptions.clone();
        let connection = connection::spawn(config, commands_rx, events_tx);

        let dispatcher = Dispatcher {
            schema: Arc::clone(&schema),
            cache: Arc::clone(&cache),
            observer,
            commands: commands_tx.clone(),
            negotiated: Arc::clone(&negotiated),
            subscriptions,
        };
        let dispatch = tokio::spawn(dispatcher.run(events_rx));

        Ok(Self {
            schema,
            cache,
            commands: commands_tx,
            negotiated,
            connection,
            dispatch,
        })
    }

    /// The parsed schema this client was started against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Identity assigned by the server, once connected.
    pub fn identity(&self) -> Option<Identity> {
        *self
            .negotiated
            .identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Connection id assigned by the server, once connected.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        *self
            .negotiated
            .connection_id
            .read()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// The current bearer token (possibly server-minted). Persist it and
    /// feed it back into a later [`ClientConfig`] to keep an identity.
    pub fn token(&self) -> Option<String> {
        self.negotiated
            .token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Calls a reducer with named arguments, encoded against the schema.
    ///
    /// Fails without touching the socket when the reducer is unknown or the
    /// arguments do not encode.
    pub async fn call_reducer(&self, name: &str, args: &Row) -> ClientResult<()> {
        let reducer = self
            .schema
            .reducer(name)
            .ok_or_else(|| ClientError::UnknownReducer(name.to_string()))?;
        let encoded = encode_reducer_args(args, &reducer.params)?;
        self.send(Command::CallReducer {
            reducer: name.to_string(),
            args: encoded,
        })
        .await
    }

    /// Calls a reducer with pre-encoded argument bytes.
    pub async fn call_reducer_raw(&self, name: &str, args: Bytes) -> ClientResult<()> {
        self.send(Command::CallReducer {
            reducer: name.to_string(),
            args,
        })
        .await
    }

    /// Calls a procedure with pre-encoded argument bytes.
    pub async fn call_procedure_raw(&self, name: &str, args: Bytes) -> ClientResult<()> {
        self.send(Command::CallProcedure {
            procedure: name.to_string(),
            args,
        })
        .await
    }

    /// Subscribes to a set of queries, returning the minted query-set id.
    pub async fn subscribe(&self, queries: Vec<String>) -> ClientResult<u32> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { queries, reply }).await?;
        rx.await.map_err(|_| ClientError::ConnectionClosed)
    }

    /// Subscribes to every table in the schema.
    pub async fn subscribe_all_tables(&self) -> ClientResult<u32> {
        let mut queries: Vec<String> = self
            .schema
            .tables()
            .map(|t| format!("SELECT * FROM {}", t.name))
            .collect();
        queries.sort();
        self.subscribe(queries).await
    }

    /// Drops a query set. With `send_dropped_rows`, the acknowledgment
    /// carries the rows that left the subscription.
    pub async fn unsubscribe(&self, query_set_id: u32, send_dropped_rows: bool) -> ClientResult<()> {
        self.send(Command::Unsubscribe {
            query_set_id,
            send_dropped_rows,
        })
        .await
    }

    /// Runs a one-shot query; the result arrives via
    /// [`ClientObserver::on_query_result`].
    pub async fn one_off_query(&self, query: impl Into<String>) -> ClientResult<()> {
        self.send(Command::OneOffQuery {
            query: query.into(),
        })
        .await
    }

    /// All mirrored rows of a table.
    pub fn get_all(&self, table: &str) -> Vec<Row> {
        self.cache.get_all(table)
    }

    /// Looks up a mirrored row by primary-key value.
    pub fn find(&self, table: &str, pk: &Value) -> Option<Row> {
        self.cache.find(table, pk)
    }

    /// Looks up a mirrored row by composite primary-key values.
    pub fn find_by_key(&self, table: &str, pk: &[Value]) -> Option<Row> {
        self.cache.find_by_key(table, pk)
    }

    /// Number of mirrored rows of a table.
    pub fn count(&self, table: &str) -> u64 {
        self.cache.count(table)
    }

    /// Stops the client: the connection closes its socket, pending requests
    /// are reported aborted, and both tasks drain to completion.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.connection.await;
        let _ = self.dispatch.await;
    }

    async fn send(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

struct Dispatcher {
    schema: Arc<Schema>,
    cache: Arc<Cache>,
    observer: Arc<dyn ClientObserver>,
    commands: mpsc::Sender<Command>,
    negotiated: Arc<NegotiatedState>,
    subscriptions: Vec<String>,
}

impl Dispatcher {
    async fn run(self, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("event channel closed, dispatch ending");
    }

    fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected {
                identity,
                connection_id,
                token,
            } => self.on_connected(identity, connection_id, token),
            ConnectionEvent::Message(message) => self.on_message(message),
            ConnectionEvent::RequestAborted { request_id } => {
                self.observer.on_request_aborted(request_id);
            }
            ConnectionEvent::Disconnected { reason, attempt } => {
                self.observer.on_disconnect(&reason, attempt);
            }
            ConnectionEvent::Failed => self.observer.on_connection_failed(),
        }
    }

    fn on_connected(&self, identity: Identity, connection_id: ConnectionId, token: String) {
        // Each field is a single whole-value store, so a poisoned guard
        // never hides a partial write; recover it.
        *self
            .negotiated
            .identity
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(identity);
        *self
            .negotiated
            .connection_id
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(connection_id);
        *self
            .negotiated
            .token
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        self.observer.on_connect(&identity, &connection_id, &token);

        if !self.subscriptions.is_empty() {
            let commands = self.commands.clone();
            let queries = self.subscriptions.clone();
            // Sent from a separate task so dispatch never blocks on the
            // command channel.
            tokio::spawn(async move {
                let (reply, _rx) = oneshot::channel();
                if commands
                    .send(Command::Subscribe { queries, reply })
                    .await
                    .is_err()
                {
                    debug!("connection gone before initial subscribe");
                }
            });
        }
    }

    fn on_message(&self, message: ServerMessage) {
        match message {
            ServerMessage::SubscribeApplied {
                query_set_id, rows, ..
            } => self.on_subscribe_applied(query_set_id, rows),
            ServerMessage::UnsubscribeApplied {
                request_id,
                query_set_id,
                rows,
            } => self.on_unsubscribe_applied(request_id, query_set_id, rows),
            ServerMessage::SubscriptionError {
                request_id,
                query_set_id,
                error,
            } => self
                .observer
                .on_subscription_error(request_id, query_set_id, &error),
            ServerMessage::TransactionUpdate(tx) => {
                self.apply_and_dispatch_transaction(&tx);
            }
            ServerMessage::OneOffQueryResult { request_id, result } => {
                self.on_query_result(request_id, result);
            }
            ServerMessage::ReducerResult {
                request_id,
                timestamp_ns,
                outcome,
            } => {
                if let ReducerOutcome::Ok { tx, .. } = &outcome {
                    self.apply_and_dispatch_transaction(tx);
                }
                self.observer
                    .on_reducer_result(request_id, timestamp_ns, &outcome);
            }
            ServerMessage::ProcedureResult {
                status,
                timestamp_ns,
                duration_ns,
                request_id,
            } => self
                .observer
                .on_procedure_result(request_id, timestamp_ns, duration_ns, &status),
            ServerMessage::InitialConnection { .. } => {
                // The connection task converts this into Connected.
                debug!("unexpected initial-connection message in dispatch");
            }
        }
    }

    fn on_subscribe_applied(&self, query_set_id: u32, rows: QueryRows) {
        // Decode everything first: a structurally bad row list drops the
        // whole message before any cache mutation.
        let decoded = match self.decode_query_rows(&rows) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%err, query_set_id, "dropping subscription snapshot");
                return;
            }
        };
        for (table, rows) in &decoded {
            self.cache.apply_snapshot(table, rows);
        }
        for (table, rows) in &decoded {
            self.observer.on_subscribe_applied(query_set_id, table, rows);
        }
    }

    fn on_unsubscribe_applied(&self, request_id: u32, query_set_id: u32, rows: Option<QueryRows>) {
        if let Some(rows) = rows {
            match self.decode_query_rows(&rows) {
                Ok(decoded) => {
                    for (table, rows) in &decoded {
                        self.cache.apply_delta(table, rows, &[]);
                    }
                }
                Err(err) => warn!(%err, query_set_id, "dropping unsubscribe row set"),
            }
        }
        self.observer.on_unsubscribe_applied(request_id, query_set_id);
    }

    fn on_query_result(&self, request_id: u32, result: Result<QueryRows, String>) {
        let decoded = match result {
            Ok(rows) => match self.decode_query_rows(&rows) {
                Ok(decoded) => Ok(decoded
                    .into_iter()
                    .map(|(table, rows)| QueryResultRows { table, rows })
                    .collect::<Vec<_>>()),
                Err(err) => {
                    warn!(%err, request_id, "dropping one-off query result");
                    return;
                }
            },
            Err(error) => Err(error),
        };
        self.observer.on_query_result(request_id, &decoded);
    }

    /// Decodes each table's rows against the schema. Tables the schema does
    /// not know are skipped; a structurally bad row list fails the lot.
    fn decode_query_rows(&self, rows: &QueryRows) -> WireResult<Vec<(String, Vec<Row>)>> {
        let mut decoded = Vec::with_capacity(rows.tables.len());
        for table_rows in &rows.tables {
            let Ok(columns) = self.schema.columns_for(&table_rows.table) else {
                warn!(table = %table_rows.table, "skipping rows for unknown table");
                continue;
            };
            decoded.push((table_rows.table.clone(), table_rows.rows.decode_rows(columns)?));
        }
        Ok(decoded)
    }

    /// Applies a transaction to the cache, then dispatches the transaction
    /// callback and (unless suppressed) the per-row callbacks.
    fn apply_and_dispatch_transaction(&self, tx: &TransactionUpdate) {
        let Some(changes) = self.decode_transaction(tx) else {
            return;
        };

        for table in &changes.tables {
            self.cache
                .apply_delta(&table.table, &table.deletes, &table.inserts);
        }

        if self.observer.on_transaction(&changes) == RowDispatch::Suppress {
            return;
        }

        for table in changes.tables {
            let (deletes, updates, inserts) =
                reconcile(table.deletes, table.inserts, |row| {
                    self.cache.row_key(&table.table, row)
                });
            for row in &deletes {
                self.observer.on_delete(&table.table, row);
            }
            for (old, new) in &updates {
                self.observer.on_update(&table.table, old, new);
            }
            for row in &inserts {
                self.observer.on_insert(&table.table, row);
            }
        }
    }

    /// Decodes a transaction into per-table delete/insert lists, merging
    /// across query sets in arrival order. Returns `None` (dropping the
    /// transaction) on a structurally bad row list.
    fn decode_transaction(&self, tx: &TransactionUpdate) -> Option<TransactionChanges> {
        let mut order: Vec<String> = Vec::new();
        let mut by_table: HashMap<String, TableChanges> = HashMap::new();

        for query_set in &tx.query_sets {
            for table_update in &query_set.tables {
                let Ok(columns) = self.schema.columns_for(&table_update.table_name) else {
                    warn!(
                        table = %table_update.table_name,
                        "skipping transaction rows for unknown table"
                    );
                    continue;
                };
                for rows in &table_update.rows {
                    let TableUpdateRows::Persistent { inserts, deletes } = rows else {
                        // Event rows are ephemeral; the mirror ignores them.
                        continue;
                    };
                    let decoded_deletes = match deletes.decode_rows(columns) {
                        Ok(rows) => rows,
                        Err(err) => {
                            warn!(%err, table = %table_update.table_name, "dropping transaction");
                            return None;
                        }
                    };
                    let decoded_inserts = match inserts.decode_rows(columns) {
                        Ok(rows) => rows,
                        Err(err) => {
                            warn!(%err, table = %table_update.table_name, "dropping transaction");
                            return None;
                        }
                    };
                    let entry = by_table
                        .entry(table_update.table_name.clone())
                        .or_insert_with(|| {
                            order.push(table_update.table_name.clone());
                            TableChanges {
                                table: table_update.table_name.clone(),
                                ..TableChanges::default()
                            }
                        });
                    entry.deletes.extend(decoded_deletes);
                    entry.inserts.extend(decoded_inserts);
                }
            }
        }

        let tables = order
            .into_iter()
            .filter_map(|name| by_table.remove(&name))
            .collect();
        Some(TransactionChanges { tables })
    }
}

// ============================================================================
// Delete/insert reconciliation
// ============================================================================

/// Pairs deletes with inserts sharing a primary key into updates.
///
/// Pairing is 1-1 by order of occurrence: each insert claims the earliest
/// unclaimed delete with the same key. Returns `(pure deletes, updates,
/// pure inserts)` in dispatch order. Rows whose key cannot be computed
/// never pair.
pub(crate) fn reconcile(
    deletes: Vec<Row>,
    inserts: Vec<Row>,
    mut key_of: impl FnMut(&Row) -> Option<Vec<u8>>,
) -> (Vec<Row>, Vec<(Row, Row)>, Vec<Row>) {
    let mut unclaimed: HashMap<Vec<u8>, VecDeque<usize>> = HashMap::new();
    for (i, row) in deletes.iter().enumerate() {
        if let Some(key) = key_of(row) {
            unclaimed.entry(key).or_default().push_back(i);
        }
    }

    let mut delete_slots: Vec<Option<Row>> = deletes.into_iter().map(Some).collect();
    let mut updates = Vec::new();
    let mut pure_inserts = Vec::new();

    for insert in inserts {
        let claimed = key_of(&insert)
            .and_then(|key| unclaimed.get_mut(&key))
            .and_then(VecDeque::pop_front);
        match claimed {
            Some(i) => {
                let old = delete_slots[i].take().expect("delete claimed twice");
                updates.push((old, insert));
            }
            None => pure_inserts.push(insert),
        }
    }

    let pure_deletes = delete_slots.into_iter().flatten().collect();
    (pure_deletes, updates, pure_inserts)
}
