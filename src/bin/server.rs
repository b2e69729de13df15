//! HTTP server for the datahouse API

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use datahouse::api::{self, AppState};
use datahouse::config::Config;
use datahouse::db::clickhouse::ClickHouseClient;
use datahouse::db::metadata_repo::MetadataRepository;
use datahouse::ingestion::IngestionPipeline;

#[derive(Parser)]
#[command(name = "datahouse")]
#[command(about = "CSV dataset ingestion and exploration API over ClickHouse")]
struct Args {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "8000")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::from_env()?);

    info!("🚀 Starting datahouse API server...");
    let client = Arc::new(ClickHouseClient::new(&config.store)?);
    client.ping().await?;

    let repo = MetadataRepository::new(client.clone());
    repo.ensure_metadata_table().await?;

    let pipeline = Arc::new(IngestionPipeline::new(&config)?);
    let state = AppState {
        client,
        repo,
        pipeline,
        config,
    };
    let app = api::router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Listening on http://{}", addr);
    info!("  POST /upload_csv    - Ingest a CSV from a URL");
    info!("  POST /explore_data  - Query a dataset with filters and pagination");
    info!("  GET  /config        - Configured API keys");
    axum::serve(listener, app).await?;

    Ok(())
}
