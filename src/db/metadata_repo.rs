//! Dataset registry over the `datasets_metadata` table
//!
//! Assigns dataset ids, derives table names, and records the mapping. The
//! id is a 32-char lowercase hex token and the table name is a pure
//! function of it, so `resolve` always returns exactly what `register`
//! produced.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::clickhouse::{BoundQuery, ClickHouseClient};
use crate::error::{DatahouseError, Result};

pub const METADATA_TABLE: &str = "datasets_metadata";

#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub dataset_id: String,
    pub table_name: String,
}

/// Generate a fresh opaque dataset id.
pub fn new_dataset_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Derive the storage table name from a dataset id.
pub fn table_name_for(dataset_id: &str) -> String {
    format!("dataset_{}", dataset_id)
}

#[derive(Clone)]
pub struct MetadataRepository {
    client: Arc<ClickHouseClient>,
}

impl MetadataRepository {
    pub fn new(client: Arc<ClickHouseClient>) -> Self {
        Self { client }
    }

    /// Create the metadata table if it does not exist yet. Run at startup.
    pub async fn ensure_metadata_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             dataset_id String, \
             table_name String, \
             upload_time DateTime DEFAULT now()\
             ) ENGINE = MergeTree() ORDER BY dataset_id",
            METADATA_TABLE
        );
        self.client.execute(&BoundQuery::new(sql)).await?;
        info!("Metadata table {} is ready", METADATA_TABLE);
        Ok(())
    }

    /// Assign a new dataset id and persist the (id, table name) mapping.
    ///
    /// There is no rollback path: a data table created after a successful
    /// register stays orphaned if a later step fails.
    pub async fn register(&self) -> Result<DatasetRecord> {
        let dataset_id = new_dataset_id();
        let table_name = table_name_for(&dataset_id);
        info!("Registering dataset {} -> {}", dataset_id, table_name);

        let row = json!({
            "dataset_id": dataset_id,
            "table_name": table_name,
        });
        self.client
            .insert_rows(
                METADATA_TABLE,
                &["dataset_id".to_string(), "table_name".to_string()],
                &[row],
            )
            .await
            .map_err(|e| {
                error!("Failed to record metadata for dataset {}: {}", dataset_id, e);
                match e {
                    DatahouseError::Store(msg) => DatahouseError::MetadataWrite(msg),
                    other => other,
                }
            })?;

        Ok(DatasetRecord {
            dataset_id,
            table_name,
        })
    }

    /// Look up the table name registered for `dataset_id`.
    pub async fn resolve(&self, dataset_id: &str) -> Result<String> {
        if dataset_id.is_empty() {
            return Err(DatahouseError::NotFound("empty dataset_id".to_string()));
        }

        let query = BoundQuery::with_params(
            format!(
                "SELECT table_name FROM {} WHERE dataset_id = {{id:String}}",
                METADATA_TABLE
            ),
            vec![("id".to_string(), dataset_id.to_string())],
        );
        let rows = self.client.query_rows(&query).await?;
        rows.first()
            .and_then(|r| r.get("table_name"))
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| {
                error!("Unknown dataset_id: {}", dataset_id);
                DatahouseError::NotFound(dataset_id.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_id_is_lowercase_hex_token() {
        let id = new_dataset_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_dataset_ids_are_unique() {
        assert_ne!(new_dataset_id(), new_dataset_id());
    }

    #[test]
    fn test_table_name_is_pure_function_of_id() {
        let id = new_dataset_id();
        assert_eq!(table_name_for(&id), format!("dataset_{}", id));
        assert_eq!(table_name_for(&id), table_name_for(&id));
    }
}
