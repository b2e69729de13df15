use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatahouseError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("ClickHouse connection error: {0}")]
    Connection(String),

    #[error("Failed to fetch or parse CSV: {0}")]
    Fetch(String),

    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("Invalid filter field: {0}")]
    InvalidFilter(String),

    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    #[error("Failed to write dataset metadata: {0}")]
    MetadataWrite(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DatahouseError>;
