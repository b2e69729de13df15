//! HTTP API surface
//!
//! Three routes: `POST /upload_csv` and `POST /explore_data` behind the
//! `x-api-key` check, and `GET /config` which deliberately exposes the key
//! list without authentication. Errors are translated to HTTP statuses
//! here and nowhere else.

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::clickhouse::ClickHouseClient;
use crate::db::metadata_repo::MetadataRepository;
use crate::error::DatahouseError;
use crate::ingestion::IngestionPipeline;
use crate::query_builder::{build_queries, QuerySpec};

/// Shared application state, built once in `main` and injected into every
/// handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<ClickHouseClient>,
    pub repo: MetadataRepository,
    pub pipeline: Arc<IngestionPipeline>,
    pub config: Arc<Config>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CsvUploadRequest {
    pub csv_url: String,
}

#[derive(Debug, Serialize)]
pub struct CsvUploadResponse {
    pub status: String,
    pub dataset_id: String,
    pub table_name: String,
}

#[derive(Debug, Deserialize)]
pub struct DataQueryRequest {
    pub dataset_id: String,
    pub filters: Option<Map<String, Value>>,
    pub date_gt: Option<String>,
    pub date_lt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    25
}

#[derive(Debug, Serialize)]
pub struct DataQueryResponse {
    pub status: String,
    pub total_results: u64,
    pub results: Vec<Value>,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub api_keys: Vec<String>,
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiError {
    status: String,
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

pub struct ApiErrorResponse {
    status: StatusCode,
    body: ApiError,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error_type: &str, message: String) -> Self {
        Self {
            status,
            body: ApiError {
                status: "error".to_string(),
                error: ErrorDetails {
                    message,
                    error_type: error_type.to_string(),
                },
            },
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "ValidationError", message.into())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<DatahouseError> for ApiErrorResponse {
    fn from(err: DatahouseError) -> Self {
        let (status, error_type) = match &err {
            DatahouseError::Fetch(_) => (StatusCode::BAD_REQUEST, "FetchError"),
            DatahouseError::NotFound(_) => (StatusCode::BAD_REQUEST, "NotFoundError"),
            DatahouseError::InvalidFilter(_) => (StatusCode::BAD_REQUEST, "InvalidFilterError"),
            DatahouseError::InvalidDate(_) => (StatusCode::BAD_REQUEST, "InvalidDateError"),
            DatahouseError::Unauthorized => (StatusCode::UNAUTHORIZED, "AuthError"),
            DatahouseError::MetadataWrite(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "MetadataWriteError")
            }
            DatahouseError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StoreError"),
            DatahouseError::Connection(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ConnectionError")
            }
            DatahouseError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ConfigurationError")
            }
            DatahouseError::Io(_) | DatahouseError::Json(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError")
            }
        };
        ApiErrorResponse::new(status, error_type, err.to_string())
    }
}

// ============================================================================
// Authentication
// ============================================================================

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(key) if state.config.api_keys.iter().any(|valid| valid == key) => {
            next.run(request).await
        }
        _ => {
            warn!("Unauthorized access attempt");
            ApiErrorResponse::from(DatahouseError::Unauthorized).into_response()
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn upload_csv(
    State(state): State<AppState>,
    Json(request): Json<CsvUploadRequest>,
) -> Result<Json<CsvUploadResponse>, ApiErrorResponse> {
    reqwest::Url::parse(&request.csv_url)
        .map_err(|e| ApiErrorResponse::bad_request(format!("invalid csv_url: {}", e)))?;

    let outcome = state
        .pipeline
        .ingest(&state.client, &state.repo, &request.csv_url)
        .await?;

    Ok(Json(CsvUploadResponse {
        status: "success".to_string(),
        dataset_id: outcome.dataset_id,
        table_name: outcome.table_name,
    }))
}

async fn explore_data(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
    Json(request): Json<DataQueryRequest>,
) -> Result<Json<DataQueryResponse>, ApiErrorResponse> {
    if params.page < 1 {
        return Err(ApiErrorResponse::bad_request("page must be greater than 0"));
    }
    if params.page_size < 1 || params.page_size > 100 {
        return Err(ApiErrorResponse::bad_request(
            "page_size must be between 1 and 100",
        ));
    }

    let table_name = state.repo.resolve(&request.dataset_id).await?;
    let valid_columns = state.client.fetch_column_names(&table_name).await?;

    let spec = QuerySpec {
        filters: request.filters.as_ref(),
        date_gt: request.date_gt.as_deref(),
        date_lt: request.date_lt.as_deref(),
        page: params.page,
        page_size: params.page_size,
    };
    let (row_query, count_query) = build_queries(
        &table_name,
        &valid_columns,
        &state.config.layout.date_column,
        &spec,
    )?;
    info!("Executing query: {}", row_query.sql);

    let total_results = state.client.query_scalar_u64(&count_query).await?;
    let results = state.client.query_rows(&row_query).await?;

    Ok(Json(DataQueryResponse {
        status: "success".to_string(),
        total_results,
        results,
        page: params.page,
        page_size: params.page_size,
    }))
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        api_keys: state.config.api_keys.clone(),
    })
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let origin = match state.config.cors_origin.parse::<HeaderValue>() {
        Ok(value) => value,
        Err(_) => {
            warn!(
                "Invalid CORS origin \"{}\", falling back to default",
                state.config.cors_origin
            );
            HeaderValue::from_static("http://localhost:8001")
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload_csv", post(upload_csv))
        .route("/explore_data", post(explore_data))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .route("/config", get(get_config))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StoreConfig, TableLayout};
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_config() -> Config {
        Config {
            store: StoreConfig {
                host: "localhost".to_string(),
                port: 8443,
                user: "default".to_string(),
                password: String::new(),
                tls_verify: true,
            },
            api_keys: vec!["test-key".to_string()],
            layout: TableLayout {
                date_column: "Release date".to_string(),
                order_column: "AppID".to_string(),
            },
            fetch_tls_verify: true,
            cors_origin: "http://localhost:8001".to_string(),
        }
    }

    fn create_test_app() -> Router {
        let config = Arc::new(test_config());
        let client = Arc::new(ClickHouseClient::new(&config.store).unwrap());
        let state = AppState {
            client: client.clone(),
            repo: MetadataRepository::new(client),
            pipeline: Arc::new(IngestionPipeline::new(&config).unwrap()),
            config,
        };
        router(state)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_config_endpoint_requires_no_auth() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["api_keys"], serde_json::json!(["test-key"]));
    }

    #[tokio::test]
    async fn test_upload_rejected_without_api_key() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_csv")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"csv_url":"https://example.com/x.csv"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "AuthError");
    }

    #[tokio::test]
    async fn test_explore_rejected_with_wrong_api_key() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/explore_data")
                    .header("content-type", "application/json")
                    .header("x-api-key", "wrong-key")
                    .body(Body::from(r#"{"dataset_id":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_explore_rejects_zero_page() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/explore_data?page=0")
                    .header("content-type", "application/json")
                    .header("x-api-key", "test-key")
                    .body(Body::from(r#"{"dataset_id":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_explore_rejects_oversized_page_size() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/explore_data?page_size=1000")
                    .header("content-type", "application/json")
                    .header("x-api-key", "test-key")
                    .body(Body::from(r#"{"dataset_id":"abc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_rejects_malformed_url() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_csv")
                    .header("content-type", "application/json")
                    .header("x-api-key", "test-key")
                    .body(Body::from(r#"{"csv_url":"not a url"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "ValidationError");
    }
}
