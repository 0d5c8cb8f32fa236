//! # stdb-client: Schema-aware client for a module-based remote database
//!
//! The client negotiates a WebSocket connection, keeps a local mirror of
//! subscribed tables, and exposes schema-driven reducer calls.
//!
//! ```text
//! ┌──────────┐  HTTP   ┌────────┐
//! │  schema  │ ──────► │ Schema │──┐
//! └──────────┘         └────────┘  ▼
//! ┌──────────┐  ws     ┌────────────┐  events  ┌──────────┐
//! │  server  │ ◄─────► │ connection │ ───────► │ dispatch │──► observer
//! └──────────┘         └────────────┘          └────┬─────┘
//!                                                   ▼
//!                                              ┌────────┐
//!                                              │ cache  │ ◄── get_all/find/count
//!                                              └────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stdb_client::{Client, ClientConfig, NoopObserver};
//! use stdb_types::{Row, Value};
//!
//! let config = ClientConfig::new("localhost:3000", "quickstart")
//!     .with_subscriptions(["SELECT * FROM person".to_string()]);
//! let client = Client::start(config, Arc::new(NoopObserver)).await?;
//!
//! let args = Row::new()
//!     .with("name", Value::String("Ann".into()))
//!     .with("age", Value::U32(30));
//! client.call_reducer("add_person", &args).await?;
//! ```
//!
//! # Tasks
//!
//! Two tokio tasks per client: the connection task owns the socket, id
//! counters, and pending-request map; the dispatch task owns cache writes
//! and observer callbacks. Callers interact through bounded channels, so a
//! caller outrunning the socket blocks rather than buffering unboundedly.

mod cache;
mod client;
mod config;
mod connection;
mod error;
mod event;
mod http;

pub use cache::Cache;
pub use client::Client;
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{ClientError, ClientResult};
pub use event::{
    ClientObserver, NoopObserver, QueryResultRows, RowDispatch, TableChanges, TransactionChanges,
};

// Re-exported so observers can name everything they receive.
pub use stdb_types::{Row, Value};
pub use stdb_wire::{Compression, ConnectionId, Identity, ProcedureStatus, ReducerOutcome};
