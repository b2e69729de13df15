//! Environment-driven configuration
//!
//! Everything the server needs from the environment is read once at startup
//! into a `Config` and passed down by reference. Components never reach into
//! `std::env` themselves.

use crate::error::{DatahouseError, Result};

/// ClickHouse connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Verify the store's TLS certificate. On unless explicitly disabled.
    pub tls_verify: bool,
}

impl StoreConfig {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/", self.host, self.port)
    }
}

/// Partition/order layout applied to every dataset table.
///
/// The date column is also the one normalized during ingestion and the one
/// `date_gt`/`date_lt` range filters apply to. Both columns must exist in
/// each uploaded CSV; the ingestion pipeline rejects uploads that lack them.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub date_column: String,
    pub order_column: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub api_keys: Vec<String>,
    pub layout: TableLayout,
    /// Verify TLS certificates when fetching CSVs. On unless disabled.
    pub fetch_tls_verify: bool,
    pub cors_origin: String,
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(DatahouseError::Configuration(format!(
            "missing required environment variable {}",
            name
        ))),
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"),
        Err(_) => default,
    }
}

impl Config {
    /// Read the full configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let host = required("CLICKHOUSE_HOST")?;
        let port = required("CLICKHOUSE_PORT")?
            .parse::<u16>()
            .map_err(|e| {
                DatahouseError::Configuration(format!("invalid CLICKHOUSE_PORT: {}", e))
            })?;
        let user = required("CLICKHOUSE_USER")?;
        let password = env_or("CLICKHOUSE_PASSWORD", "");

        let api_keys: Vec<String> = env_or("API_KEYS", "")
            .split(',')
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
            .collect();

        Ok(Config {
            store: StoreConfig {
                host,
                port,
                user,
                password,
                tls_verify: env_flag("CLICKHOUSE_TLS_VERIFY", true),
            },
            api_keys,
            layout: TableLayout {
                date_column: env_or("DATASET_DATE_COLUMN", "Release date"),
                order_column: env_or("DATASET_ORDER_COLUMN", "AppID"),
            },
            fetch_tls_verify: env_flag("FETCH_TLS_VERIFY", true),
            cors_origin: env_or("CORS_ORIGIN", "http://localhost:8001"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag_parsing() {
        std::env::set_var("TEST_FLAG_ON", "true");
        std::env::set_var("TEST_FLAG_OFF", "false");
        std::env::set_var("TEST_FLAG_ZERO", "0");
        assert!(env_flag("TEST_FLAG_ON", false));
        assert!(!env_flag("TEST_FLAG_OFF", true));
        assert!(!env_flag("TEST_FLAG_ZERO", true));
        assert!(env_flag("TEST_FLAG_UNSET_XYZ", true));
        assert!(!env_flag("TEST_FLAG_UNSET_XYZ", false));
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        std::env::remove_var("CLICKHOUSE_HOST");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, DatahouseError::Configuration(_)));
    }

    #[test]
    fn test_store_base_url() {
        let store = StoreConfig {
            host: "ch.example.com".to_string(),
            port: 8443,
            user: "default".to_string(),
            password: String::new(),
            tls_verify: true,
        };
        assert_eq!(store.base_url(), "https://ch.example.com:8443/");
    }
}
