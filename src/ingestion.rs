//! CSV ingestion pipeline
//!
//! Fetches a CSV from a URL, normalizes the configured date column, turns
//! missing cells into explicit nulls, infers a per-column storage schema,
//! creates the dataset table, and bulk-loads the rows. Steps run in order
//! and any failure aborts the whole upload; there is no partial-failure
//! recovery, so a registered dataset whose load fails stays registered with
//! an empty or partially populated table.

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::config::{Config, TableLayout};
use crate::db::clickhouse::{quote_identifier, BoundQuery, ClickHouseClient};
use crate::db::metadata_repo::MetadataRepository;
use crate::error::{DatahouseError, Result};
use crate::schema_infer::{infer_column_type, ColumnType, StorageType};
use crate::time::{parse_flexible_date, to_storage_datetime};

/// A parsed CSV: header names plus rows of optional cells, where `None`
/// marks a missing value.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = Option<&str>> {
        self.rows
            .iter()
            .map(move |row| row.get(index).and_then(|c| c.as_deref()))
    }
}

#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub dataset_id: String,
    pub table_name: String,
    pub row_count: usize,
}

fn is_missing(cell: &str) -> bool {
    matches!(cell, "" | "NaN" | "nan" | "null" | "NULL" | "None")
}

/// Parse raw CSV bytes into a `CsvTable`. Header-derived column names;
/// short rows are padded with nulls, long rows truncated.
pub fn parse_csv(bytes: &[u8]) -> Result<CsvTable> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DatahouseError::Fetch(format!("failed to parse CSV header: {}", e)))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(DatahouseError::Fetch("CSV has no header row".to_string()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| DatahouseError::Fetch(format!("failed to parse CSV: {}", e)))?;
        let mut row: Vec<Option<String>> = record
            .iter()
            .take(headers.len())
            .map(|cell| {
                if is_missing(cell) {
                    None
                } else {
                    Some(cell.to_string())
                }
            })
            .collect();
        row.resize(headers.len(), None);
        rows.push(row);
    }

    Ok(CsvTable { headers, rows })
}

/// Rewrite every cell of the date column as a canonical storage datetime.
/// Unparseable values become nulls, not failures.
pub fn normalize_date_column(table: &mut CsvTable, column: &str) {
    let Some(index) = table.headers.iter().position(|h| h == column) else {
        return;
    };
    for row in &mut table.rows {
        row[index] = row[index]
            .as_deref()
            .and_then(parse_flexible_date)
            .map(to_storage_datetime);
    }
}

fn validate_layout(headers: &[String], layout: &TableLayout) -> Result<()> {
    for column in [&layout.date_column, &layout.order_column] {
        if !headers.iter().any(|h| h == column) {
            return Err(DatahouseError::Fetch(format!(
                "CSV is missing required column \"{}\"",
                column
            )));
        }
    }
    Ok(())
}

/// Infer the storage type of every column.
pub fn infer_schema(table: &CsvTable) -> Vec<ColumnType> {
    (0..table.headers.len())
        .map(|i| infer_column_type(table.column_values(i)))
        .collect()
}

/// CREATE TABLE statement for a dataset table with the inferred schema.
pub fn create_table_sql(
    table_name: &str,
    headers: &[String],
    schema: &[ColumnType],
    layout: &TableLayout,
) -> String {
    let columns = headers
        .iter()
        .zip(schema)
        .map(|(name, ty)| format!("{} {}", quote_identifier(name), ty.declaration()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}) ENGINE = MergeTree() PARTITION BY {} ORDER BY {}",
        quote_identifier(table_name),
        columns,
        quote_identifier(&layout.date_column),
        quote_identifier(&layout.order_column),
    )
}

fn cell_to_json(cell: Option<&str>, ty: &ColumnType) -> Value {
    let Some(raw) = cell else {
        return Value::Null;
    };
    match ty.base {
        StorageType::Int64 => raw.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
        StorageType::Float64 => raw
            .parse::<f64>()
            .ok()
            .and_then(|f| serde_json::Number::from_f64(f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        StorageType::Bool => Value::Bool(raw.eq_ignore_ascii_case("true")),
        StorageType::DateTime => parse_flexible_date(raw)
            .map(|d| Value::String(to_storage_datetime(d)))
            .unwrap_or(Value::Null),
        StorageType::String => Value::String(raw.to_string()),
    }
}

/// Encode all rows as JSON objects typed per the inferred schema, ready for
/// a JSONEachRow bulk insert.
pub fn rows_to_json(table: &CsvTable, schema: &[ColumnType]) -> Vec<Value> {
    table
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::with_capacity(table.headers.len());
            for (i, header) in table.headers.iter().enumerate() {
                let cell = row.get(i).and_then(|c| c.as_deref());
                object.insert(header.clone(), cell_to_json(cell, &schema[i]));
            }
            Value::Object(object)
        })
        .collect()
}

pub struct IngestionPipeline {
    http: reqwest::Client,
    layout: TableLayout,
}

impl IngestionPipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !config.fetch_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().map_err(|e| {
            DatahouseError::Configuration(format!("failed to build fetch client: {}", e))
        })?;
        Ok(Self {
            http,
            layout: config.layout.clone(),
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        info!("Fetching CSV from {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DatahouseError::Fetch(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(DatahouseError::Fetch(format!(
                "fetching {} returned {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DatahouseError::Fetch(format!("failed to read {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }

    /// Run the full upload: fetch, parse, normalize, register, create, load.
    pub async fn ingest(
        &self,
        client: &ClickHouseClient,
        repo: &MetadataRepository,
        url: &str,
    ) -> Result<IngestOutcome> {
        let bytes = self.fetch(url).await?;
        let mut table = parse_csv(&bytes)?;
        validate_layout(&table.headers, &self.layout)?;

        info!("Normalizing \"{}\" column", self.layout.date_column);
        normalize_date_column(&mut table, &self.layout.date_column);

        let record = repo.register().await?;
        let schema = infer_schema(&table);

        info!("Creating table {}", record.table_name);
        let create = create_table_sql(&record.table_name, &table.headers, &schema, &self.layout);
        client
            .execute(&BoundQuery::new(create))
            .await
            .map_err(|e| {
                error!("Failed to create table {}: {}", record.table_name, e);
                e
            })?;

        info!(
            "Inserting {} rows into {}",
            table.rows.len(),
            record.table_name
        );
        let rows = rows_to_json(&table, &schema);
        client
            .insert_rows(&record.table_name, &table.headers, &rows)
            .await
            .map_err(|e| {
                error!("Failed to load rows into {}: {}", record.table_name, e);
                e
            })?;

        info!(
            "Stored {} rows from {} as dataset {}",
            table.rows.len(),
            url,
            record.dataset_id
        );
        Ok(IngestOutcome {
            dataset_id: record.dataset_id,
            table_name: record.table_name,
            row_count: table.rows.len(),
        })
    }
}
