//! The subscription cache: an in-process mirror of subscribed tables.
//!
//! One store per schema table, keyed by the row's primary-key value. The
//! key is the BSATN encoding of the primary-key columns in definition
//! order, which gives composite keys and float-safe hashing for free.
//!
//! # Concurrency
//!
//! The dispatch task is the only writer; each table sits behind its own
//! `RwLock`, so reads are consistent per-operation snapshots and never see
//! a half-applied transaction (writes take the lock once per table per
//! message). A poisoned lock is recovered, not propagated: every mutation
//! under a guard is a whole-row map insert or remove, so the data behind a
//! poisoned guard is still consistent.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use bytes::BytesMut;
use tracing::warn;

use stdb_types::{encode_value, Column, Row, Schema, Value};

/// Per-table mirror keyed by encoded primary key.
struct TableStore {
    columns: Vec<Column>,
    /// Primary-key column indices. Falls back to column 0 when the schema
    /// declares none.
    pk_indices: Vec<usize>,
    rows: RwLock<HashMap<Vec<u8>, Row>>,
}

impl TableStore {
    /// Encodes the primary-key columns of `row` into a cache key.
    ///
    /// Returns `None` when a key column is absent, failed to decode, or
    /// does not encode against its declared type; such rows cannot be
    /// keyed and are skipped by writes.
    fn key_of(&self, row: &Row) -> Option<Vec<u8>> {
        let mut buf = BytesMut::new();
        for &idx in &self.pk_indices {
            let column = self.columns.get(idx)?;
            let value = row.get(&column.name)?;
            if matches!(value, Value::DecodeError(_)) {
                return None;
            }
            encode_value(value, &column.ty, &mut buf).ok()?;
        }
        Some(buf.to_vec())
    }

    /// Encodes caller-supplied key values against the primary-key columns.
    fn key_from_values(&self, values: &[Value]) -> Option<Vec<u8>> {
        if values.len() != self.pk_indices.len() {
            return None;
        }
        let mut buf = BytesMut::new();
        for (&idx, value) in self.pk_indices.iter().zip(values) {
            let column = self.columns.get(idx)?;
            encode_value(value, &column.ty, &mut buf).ok()?;
        }
        Some(buf.to_vec())
    }
}

/// Mirror of all subscribed tables.
pub struct Cache {
    tables: HashMap<String, TableStore>,
    /// Tables already complained about, so unknown-table noise logs once.
    warned: Mutex<HashSet<String>>,
}

impl Cache {
    /// Builds an empty mirror for every table in the schema.
    pub fn from_schema(schema: &Schema) -> Self {
        let mut tables = HashMap::new();
        for table in schema.tables() {
            if table.columns.is_empty() {
                warn!(table = %table.name, "table has no columns, not mirroring");
                continue;
            }
            let pk_indices = if table.primary_key.is_empty() {
                warn!(
                    table = %table.name,
                    "table has no primary key, keying by first column"
                );
                vec![0]
            } else {
                table.primary_key.clone()
            };
            tables.insert(
                table.name.clone(),
                TableStore {
                    columns: table.columns.clone(),
                    pk_indices,
                    rows: RwLock::new(HashMap::new()),
                },
            );
        }
        Self {
            tables,
            warned: Mutex::new(HashSet::new()),
        }
    }

    fn store(&self, table: &str) -> Option<&TableStore> {
        let store = self.tables.get(table);
        if store.is_none() {
            // A poisoned set only risks a repeated warning; recover it.
            let mut warned = self.warned.lock().unwrap_or_else(|e| e.into_inner());
            if warned.insert(table.to_string()) {
                warn!(%table, "table not in schema, ignoring");
            }
        }
        store
    }

    /// Applies a subscription snapshot: inserts every row, overwriting any
    /// existing entry under the same key.
    pub fn apply_snapshot(&self, table: &str, rows: &[Row]) {
        let Some(store) = self.store(table) else {
            return;
        };
        let mut map = store.rows.write().unwrap_or_else(|e| e.into_inner());
        for row in rows {
            match store.key_of(row) {
                Some(key) => {
                    map.insert(key, row.clone());
                }
                None => warn!(%table, "skipping snapshot row without a usable key"),
            }
        }
    }

    /// Applies a transaction delta: deletes, then inserts.
    pub fn apply_delta(&self, table: &str, deletes: &[Row], inserts: &[Row]) {
        let Some(store) = self.store(table) else {
            return;
        };
        let mut map = store.rows.write().unwrap_or_else(|e| e.into_inner());
        for row in deletes {
            match store.key_of(row) {
                Some(key) => {
                    map.remove(&key);
                }
                None => warn!(%table, "skipping delete without a usable key"),
            }
        }
        for row in inserts {
            match store.key_of(row) {
                Some(key) => {
                    map.insert(key, row.clone());
                }
                None => warn!(%table, "skipping insert without a usable key"),
            }
        }
    }

    /// All rows of a table. Order is unspecified.
    pub fn get_all(&self, table: &str) -> Vec<Row> {
        self.store(table)
            .map(|store| {
                store
                    .rows
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .values()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Looks up a row by its (single-column) primary-key value.
    pub fn find(&self, table: &str, pk: &Value) -> Option<Row> {
        self.find_by_key(table, std::slice::from_ref(pk))
    }

    /// Looks up a row by its primary-key values in definition order, for
    /// composite keys.
    pub fn find_by_key(&self, table: &str, pk: &[Value]) -> Option<Row> {
        let store = self.store(table)?;
        let key = store.key_from_values(pk)?;
        store
            .rows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    /// Number of rows mirrored for a table.
    pub fn count(&self, table: &str) -> u64 {
        self.store(table)
            .map(|store| store.rows.read().unwrap_or_else(|e| e.into_inner()).len() as u64)
            .unwrap_or(0)
    }

    /// Encodes the cache key of `row`, for delete/insert reconciliation.
    pub(crate) fn row_key(&self, table: &str, row: &Row) -> Option<Vec<u8>> {
        self.tables.get(table).and_then(|store| store.key_of(row))
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sizes: Vec<(&str, usize)> = self
            .tables
            .iter()
            .map(|(name, store)| {
                (
                    name.as_str(),
                    store.rows.read().map(|m| m.len()).unwrap_or(0),
                )
            })
            .collect();
        sizes.sort_unstable();
        f.debug_struct("Cache").field("tables", &sizes).finish()
    }
}
