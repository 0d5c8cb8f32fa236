//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stdb_wire::Compression;

/// Reconnection parameters.
///
/// After a disconnect the client sleeps `base_backoff * attempt`, capped at
/// `max_backoff`, and retries until `max_attempts` consecutive failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Configuration for a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Host and port, e.g. `"localhost:3000"`.
    pub host: String,
    /// Database name or identity.
    pub database: String,
    /// Bearer token presented at connect time, if any.
    pub token: Option<String>,
    /// Compression preference for server frames.
    pub compression: Compression,
    /// Queries subscribed automatically once the connection is negotiated.
    pub subscriptions: Vec<String>,
    /// Reconnection behavior.
    pub reconnect: ReconnectPolicy,
    /// Use `wss`/`https` instead of `ws`/`http`.
    pub tls: bool,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            token: None,
            compression: Compression::default(),
            subscriptions: Vec::new(),
            reconnect: ReconnectPolicy::default(),
            tls: false,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_subscriptions(mut self, queries: impl IntoIterator<Item = String>) -> Self {
        self.subscriptions = queries.into_iter().collect();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// The WebSocket endpoint for the subscription socket.
    pub(crate) fn ws_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}/v1/database/{}/subscribe?compression={}",
            self.host,
            self.database,
            self.compression.query_value()
        )
    }

    /// The HTTP endpoint serving the schema document.
    pub(crate) fn schema_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!(
            "{scheme}://{}/v1/database/{}/schema?version=9",
            self.host, self.database
        )
    }
}
