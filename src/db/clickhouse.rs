//! ClickHouse client over the HTTP interface
//!
//! One `ClickHouseClient` is constructed at process start from configuration
//! and shared by everything that talks to the store; it wraps a single
//! `reqwest::Client` whose connection pool is the "one handle, reused".
//!
//! Caller-supplied values never land in SQL text. SELECTs and metadata
//! writes carry `{name:Type}` placeholders and the values travel as
//! `param_<name>` request parameters; bulk inserts ship rows as JSONEachRow
//! bodies. Identifiers cannot be bound server-side, so table and column
//! names are validated upstream and backtick-escaped here.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::StoreConfig;
use crate::error::{DatahouseError, Result};

/// A SQL statement plus its bound parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundQuery {
    pub sql: String,
    pub params: Vec<(String, String)>,
}

impl BoundQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<(String, String)>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Escape an identifier for inclusion in backtick quotes.
pub fn escape_identifier(name: &str) -> String {
    name.replace('\\', "\\\\").replace('`', "\\`")
}

/// Backtick-quote an identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", escape_identifier(name))
}

#[derive(Deserialize)]
struct JsonOutput {
    data: Vec<Value>,
}

pub struct ClickHouseClient {
    http: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl ClickHouseClient {
    /// Build the client from store configuration. TLS certificate
    /// verification follows `tls_verify`; the connection itself is opened
    /// lazily by the pool on first request.
    pub fn new(store: &StoreConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !store.tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| DatahouseError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: store.base_url(),
            user: store.user.clone(),
            password: store.password.clone(),
        })
    }

    async fn send(&self, query_params: Vec<(String, String)>, body: String) -> Result<String> {
        let response = self
            .http
            .post(&self.base_url)
            .query(&query_params)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(body)
            .send()
            .await
            .map_err(|e| DatahouseError::Store(format!("request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DatahouseError::Store(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            error!("ClickHouse returned {}: {}", status, text.trim());
            return Err(DatahouseError::Store(format!(
                "{}: {}",
                status,
                text.trim()
            )));
        }
        Ok(text)
    }

    fn bound_params(query: &BoundQuery) -> Vec<(String, String)> {
        query
            .params
            .iter()
            .map(|(name, value)| (format!("param_{}", name), value.clone()))
            .collect()
    }

    /// Liveness probe issued at startup.
    pub async fn ping(&self) -> Result<()> {
        let text = self
            .send(Vec::new(), "SELECT 1".to_string())
            .await
            .map_err(|e| DatahouseError::Connection(e.to_string()))?;
        info!("DB ping: {}", text.trim());
        Ok(())
    }

    /// Run a statement with no result set (DDL, metadata writes).
    pub async fn execute(&self, query: &BoundQuery) -> Result<()> {
        debug!("Executing: {}", query.sql);
        self.send(Self::bound_params(query), query.sql.clone())
            .await?;
        Ok(())
    }

    /// Run a SELECT and return its rows as JSON objects.
    pub async fn query_rows(&self, query: &BoundQuery) -> Result<Vec<Value>> {
        debug!("Querying: {}", query.sql);
        let mut params = Self::bound_params(query);
        // 64-bit integers come back as JSON numbers instead of strings.
        params.push((
            "output_format_json_quote_64bit_integers".to_string(),
            "0".to_string(),
        ));
        let sql = format!("{} FORMAT JSON", query.sql);
        let text = self.send(params, sql).await?;
        let output: JsonOutput = serde_json::from_str(&text)
            .map_err(|e| DatahouseError::Store(format!("unexpected response shape: {}", e)))?;
        Ok(output.data)
    }

    /// Run a SELECT expected to return a single scalar.
    pub async fn query_scalar_u64(&self, query: &BoundQuery) -> Result<u64> {
        let rows = self.query_rows(query).await?;
        let row = rows
            .first()
            .and_then(|r| r.as_object())
            .ok_or_else(|| DatahouseError::Store("scalar query returned no rows".to_string()))?;
        let value = row
            .values()
            .next()
            .ok_or_else(|| DatahouseError::Store("scalar query returned no columns".to_string()))?;
        scalar_to_u64(value)
            .ok_or_else(|| DatahouseError::Store(format!("not a scalar count: {}", value)))
    }

    /// Bulk-insert rows into `table` using the JSONEachRow format. Values
    /// travel in the request body as data, never as SQL text.
    pub async fn insert_rows(&self, table: &str, columns: &[String], rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let statement = insert_statement(table, columns);
        let mut body = String::new();
        for row in rows {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }
        self.send(vec![("query".to_string(), statement)], body)
            .await?;
        Ok(())
    }

    /// Column names of a live table, from the system catalog.
    pub async fn fetch_column_names(&self, table: &str) -> Result<Vec<String>> {
        let query = BoundQuery::with_params(
            "SELECT name FROM system.columns WHERE table = {table:String}",
            vec![("table".to_string(), table.to_string())],
        );
        let rows = self.query_rows(&query).await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("name").and_then(|n| n.as_str()))
            .map(|n| n.to_string())
            .collect())
    }
}

fn scalar_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

fn insert_statement(table: &str, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) FORMAT JSONEachRow",
        quote_identifier(table),
        column_list
    )
}
