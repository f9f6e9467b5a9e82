use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::application::export_service::ExportService;
use crate::application::ingestion_service::IngestionService;
use crate::domain::error::BridgeError;
use crate::domain::models::{ConnectionSettings, IngestionWindow, TablePreview};
use crate::infrastructure::clickhouse::client::ClickHouseClient;
use crate::infrastructure::clickhouse::table_repo::ClickHouseTableRepository;

pub struct HttpService {
    state: AppState,
    port: u16,
    cors_origin: String,
}

impl HttpService {
    pub async fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        debug!("Initializing HTTP service");

        let defaults = ConnectionSettings {
            host: std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("CLICKHOUSE_PORT").unwrap_or_else(|_| "8123".to_string()),
            database: std::env::var("CLICKHOUSE_DB").unwrap_or_else(|_| "default".to_string()),
            user: std::env::var("CLICKHOUSE_USER").unwrap_or_else(|_| "default".to_string()),
            password: std::env::var("CLICKHOUSE_TOKEN").unwrap_or_default(),
        };
        info!(
            "Default ClickHouse connection: {}:{}, database: {}, user: {}",
            defaults.host, defaults.port, defaults.database, defaults.user
        );

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);
        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://127.0.0.1:5500".to_string());

        let state = AppState {
            http: reqwest::Client::new(),
            defaults,
        };
        debug!("HTTP service initialization complete");
        Ok(Self {
            state,
            port,
            cors_origin,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let cors = if self.cors_origin == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            CorsLayer::new()
                .allow_origin(self.cors_origin.parse::<HeaderValue>()?)
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
        };

        let app = router(self.state)
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Server is running on port {}", self.port);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    http: reqwest::Client,
    defaults: ConnectionSettings,
}

impl AppState {
    fn repository(&self, settings: ConnectionSettings) -> Arc<ClickHouseTableRepository> {
        Arc::new(ClickHouseTableRepository::new(ClickHouseClient::new(
            self.http.clone(),
            settings,
        )))
    }

    /// Read-path services are built per request; override connections live
    /// exactly as long as the request that asked for them.
    fn export_service(&self, settings: ConnectionSettings) -> ExportService {
        let repo = self.repository(settings);
        ExportService::new(repo.clone(), repo)
    }

    fn ingestion_service(&self) -> IngestionService {
        let repo = self.repository(self.defaults.clone());
        IngestionService::new(repo.clone(), repo)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route(
            "/api/source-csv/ingest",
            post(ingest).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/source-csv/tables", get(list_tables))
        .route("/api/source-csv/tables/:table/columns", get(table_columns))
        .route("/api/source-csv/tables/:table/preview", get(preview_table))
        .route("/api/source-csv/export/:table", get(export_table))
        .route("/api/source-csv/export/:table/preview", get(export_preview))
        .route("/api/source-csv/info/:table", get(table_info))
        .with_state(state)
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            BridgeError::Validation(_) => StatusCode::BAD_REQUEST,
            BridgeError::Authentication => StatusCode::UNAUTHORIZED,
            BridgeError::TableNotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::Storage(_) | BridgeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Connection override plus windowing parameters shared by the GET routes.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionQuery {
    host: Option<String>,
    port: Option<String>,
    database: Option<String>,
    user: Option<String>,
    token: Option<String>,
    rows: Option<String>,
    cols: Option<String>,
}

/// Pick the connection for a request: none of host/port/database/user given
/// means the configured default, all four mean an override, anything in
/// between is a client error. A non-blank token always wins over the
/// configured credential.
fn resolve_settings(
    defaults: &ConnectionSettings,
    q: &ConnectionQuery,
) -> Result<ConnectionSettings, BridgeError> {
    let host = trimmed(&q.host);
    let port = trimmed(&q.port);
    let database = trimmed(&q.database);
    let user = trimmed(&q.user);
    let token = trimmed(&q.token);

    match (host, port, database, user) {
        (None, None, None, None) => {
            let mut settings = defaults.clone();
            if let Some(token) = token {
                settings.password = token.to_string();
            }
            Ok(settings)
        }
        (Some(host), Some(port), Some(database), Some(user)) => Ok(ConnectionSettings {
            host: host.to_string(),
            port: port.to_string(),
            database: database.to_string(),
            user: user.to_string(),
            password: token.unwrap_or(&defaults.password).to_string(),
        }),
        _ => Err(BridgeError::Validation(
            "host, port, database & user are required together to override the connection"
                .to_string(),
        )),
    }
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_row_limit(raw: &Option<String>) -> Option<u64> {
    raw.as_deref().and_then(|s| s.trim().parse().ok())
}

// 0 columns means "all", mirroring the row treatment on the read paths
fn parse_col_limit(raw: &Option<String>) -> Option<usize> {
    raw.as_deref()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
}

async fn root() -> &'static str {
    "Bi-Directional ClickHouse ⇆ Flatfile"
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestResponse {
    success: bool,
    table: String,
    ingested_rows: u64,
    ingested_cols: usize,
}

async fn ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, BridgeError> {
    let mut upload: Option<tempfile::NamedTempFile> = None;
    let mut table_name: Option<String> = None;
    let mut start_row: Option<String> = None;
    let mut rows: Option<String> = None;
    let mut cols: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| BridgeError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                // unlinked when the handler scope ends, whatever happened
                let mut file = tempfile::NamedTempFile::new()?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| BridgeError::Validation(format!("failed to read upload: {e}")))?
                {
                    file.write_all(&chunk)?;
                }
                file.flush()?;
                upload = Some(file);
            }
            "tableName" => table_name = Some(read_text_field(field).await?),
            "startRow" => start_row = Some(read_text_field(field).await?),
            "rows" => rows = Some(read_text_field(field).await?),
            "cols" => cols = Some(read_text_field(field).await?),
            _ => {}
        }
    }

    let (upload, table) = match (upload, trimmed(&table_name)) {
        (Some(upload), Some(table)) => (upload, table.to_string()),
        _ => {
            return Err(BridgeError::Validation(
                "file and tableName are required".to_string(),
            ))
        }
    };

    let window = IngestionWindow {
        start_row: start_row
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1),
        row_limit: parse_row_limit(&rows),
        col_limit: parse_col_limit(&cols),
    };

    let report = state
        .ingestion_service()
        .ingest_file(upload.path(), &table, window)
        .await
        .map_err(|e| {
            error!("Ingestion error: {}", e);
            e
        })?;

    Ok(Json(IngestResponse {
        success: true,
        table: report.table,
        ingested_rows: report.rows_written,
        ingested_cols: report.cols_written,
    }))
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, BridgeError> {
    field
        .text()
        .await
        .map_err(|e| BridgeError::Validation(format!("failed to read form field: {e}")))
}

#[derive(Debug, Serialize)]
struct TablesResponse {
    tables: Vec<String>,
}

async fn list_tables(
    State(state): State<AppState>,
    Query(q): Query<ConnectionQuery>,
) -> Result<Json<TablesResponse>, BridgeError> {
    let settings = resolve_settings(&state.defaults, &q)?;
    let tables = state
        .export_service(settings)
        .list_tables()
        .await
        .map_err(|e| {
            error!("List tables error: {}", e);
            e
        })?;
    Ok(Json(TablesResponse { tables }))
}

#[derive(Debug, Serialize)]
struct ColumnsResponse {
    columns: Vec<String>,
}

async fn table_columns(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<ColumnsResponse>, BridgeError> {
    let columns = state
        .export_service(state.defaults.clone())
        .table_columns(&table)
        .await
        .map_err(|e| {
            error!("Get columns error: {}", e);
            e
        })?;
    Ok(Json(ColumnsResponse { columns }))
}

async fn preview_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<ConnectionQuery>,
) -> Result<Json<TablePreview>, BridgeError> {
    let preview = state
        .export_service(state.defaults.clone())
        .preview(&table, parse_row_limit(&q.rows), parse_col_limit(&q.cols))
        .await
        .map_err(|e| {
            error!("Preview error: {}", e);
            e
        })?;
    Ok(Json(preview))
}

async fn export_preview(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<ConnectionQuery>,
) -> Result<Json<TablePreview>, BridgeError> {
    let settings = resolve_settings(&state.defaults, &q)?;
    let preview = state
        .export_service(settings)
        .preview(&table, parse_row_limit(&q.rows), parse_col_limit(&q.cols))
        .await
        .map_err(|e| {
            error!("Export preview error: {}", e);
            e
        })?;
    Ok(Json(preview))
}

async fn export_table(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<ConnectionQuery>,
) -> Result<Response, BridgeError> {
    let settings = resolve_settings(&state.defaults, &q)?;
    let download = state
        .export_service(settings)
        .export(&table, parse_row_limit(&q.rows), parse_col_limit(&q.cols))
        .await
        .map_err(|e| {
            error!("CSV export error: {}", e);
            e
        })?;

    Response::builder()
        .header(header::CONTENT_TYPE, "text/csv")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.filename),
        )
        .body(Body::from_stream(download.content))
        .map_err(|e| BridgeError::Storage(e.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    col_count: usize,
    row_count: u64,
}

async fn table_info(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(q): Query<ConnectionQuery>,
) -> Result<Json<InfoResponse>, BridgeError> {
    let settings = resolve_settings(&state.defaults, &q)?;
    let info = state
        .export_service(settings)
        .table_info(&table)
        .await
        .map_err(|e| {
            error!("Table info error: {}", e);
            e
        })?;
    Ok(Json(InfoResponse {
        col_count: info.col_count,
        row_count: info.row_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_defaults() -> ConnectionSettings {
        ConnectionSettings {
            host: "localhost".to_string(),
            port: "8123".to_string(),
            database: "default".to_string(),
            user: "default".to_string(),
            password: "secret".to_string(),
        }
    }

    fn test_app() -> Router {
        router(AppState {
            http: reqwest::Client::new(),
            defaults: test_defaults(),
        })
    }

    #[test]
    fn no_override_params_yield_the_default_connection() {
        let q = ConnectionQuery::default();
        let settings = resolve_settings(&test_defaults(), &q).unwrap();
        assert_eq!(settings.host, "localhost");
        assert_eq!(settings.password, "secret");
    }

    #[test]
    fn blank_token_falls_back_to_the_configured_credential() {
        let q = ConnectionQuery {
            host: Some("ch.example".to_string()),
            port: Some("8123".to_string()),
            database: Some("analytics".to_string()),
            user: Some("reader".to_string()),
            token: Some("   ".to_string()),
            ..Default::default()
        };
        let settings = resolve_settings(&test_defaults(), &q).unwrap();
        assert_eq!(settings.host, "ch.example");
        assert_eq!(settings.password, "secret");
    }

    #[test]
    fn partial_override_is_a_validation_error() {
        let q = ConnectionQuery {
            host: Some("ch.example".to_string()),
            user: Some("reader".to_string()),
            ..Default::default()
        };
        let err = resolve_settings(&test_defaults(), &q).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn auth_failures_map_to_401_and_storage_to_500() {
        assert_eq!(
            BridgeError::Authentication.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            BridgeError::Storage("boom".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            BridgeError::Validation("bad".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn zero_limits_mean_absent() {
        assert_eq!(parse_col_limit(&Some("0".to_string())), None);
        assert_eq!(parse_col_limit(&Some("3".to_string())), Some(3));
        assert_eq!(parse_row_limit(&Some("0".to_string())), Some(0));
        assert_eq!(parse_row_limit(&None), None);
    }

    #[tokio::test]
    async fn root_serves_the_banner() {
        let response = test_app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn export_with_partial_override_is_rejected() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/source-csv/export/people?host=ch.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ingest_without_a_file_is_rejected() {
        let boundary = "bridge-test-boundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"tableName\"\r\n\r\npeople\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/source-csv/ingest")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
