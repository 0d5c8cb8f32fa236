//! HTTP schema fetch.

use tracing::debug;

use stdb_types::Schema;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Fetches and parses the database schema.
pub(crate) async fn fetch_schema(config: &ClientConfig) -> ClientResult<Schema> {
    let url = config.schema_url();
    debug!(%url, "fetching schema");

    let response = reqwest::get(&url).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::SchemaFetch {
            status: status.as_u16(),
            body,
        });
    }

    let doc: serde_json::Value = response.json().await?;
    let schema = Schema::parse(&doc)?;
    debug!(
        tables = schema.tables().count(),
        reducers = schema.reducers().count(),
        "schema parsed"
    );
    Ok(schema)
}
