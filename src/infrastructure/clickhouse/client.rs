use futures_util::TryStreamExt;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error};

use crate::domain::error::BridgeError;
use crate::domain::models::ConnectionSettings;
use crate::domain::ports::{CsvByteStream, CsvLineStream};

/// Result envelope of a `FORMAT JSON` query.
#[derive(Debug, Deserialize)]
pub struct JsonResult {
    pub data: Vec<serde_json::Value>,
}

/// Thin client for ClickHouse's HTTP interface.
///
/// Statements are POSTed with basic auth and the target database as a query
/// parameter. Engine failures are mapped to tagged `BridgeError` variants
/// here and nowhere else.
pub struct ClickHouseClient {
    http: reqwest::Client,
    settings: ConnectionSettings,
}

impl ClickHouseClient {
    pub fn new(http: reqwest::Client, settings: ConnectionSettings) -> Self {
        Self { http, settings }
    }

    fn endpoint(&self) -> String {
        format!("http://{}:{}/", self.settings.host, self.settings.port)
    }

    fn request(&self) -> reqwest::RequestBuilder {
        self.http
            .post(self.endpoint())
            .basic_auth(&self.settings.user, Some(&self.settings.password))
            .query(&[("database", self.settings.database.as_str())])
    }

    /// Run a statement, discarding any output.
    pub async fn execute(&self, sql: &str) -> Result<(), BridgeError> {
        debug!("Executing statement against {}", self.endpoint());
        let resp = self
            .request()
            .body(sql.to_string())
            .send()
            .await
            .map_err(transport_error)?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    /// Run a query with `FORMAT JSON` and parse the result envelope.
    pub async fn fetch_json(&self, sql: &str) -> Result<JsonResult, BridgeError> {
        let resp = self
            .request()
            .body(format!("{sql} FORMAT JSON"))
            .send()
            .await
            .map_err(transport_error)?;
        let resp = Self::ensure_success(resp).await?;
        resp.json::<JsonResult>().await.map_err(|e| {
            error!("Failed to decode ClickHouse JSON result: {}", e);
            BridgeError::Storage(e.to_string())
        })
    }

    /// Run a query with `FORMAT CSVWithNames`, streaming the response body.
    pub async fn fetch_csv(&self, sql: &str) -> Result<CsvByteStream, BridgeError> {
        let resp = self
            .request()
            .body(format!("{sql} FORMAT CSVWithNames"))
            .send()
            .await
            .map_err(transport_error)?;
        let resp = Self::ensure_success(resp).await?;
        let stream = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::pin(stream))
    }

    /// Run an INSERT whose data arrives as a streamed body. The statement
    /// travels as a query parameter so the body can be pure CSV.
    pub async fn insert(&self, sql: &str, body: CsvLineStream) -> Result<(), BridgeError> {
        debug!("Streaming insert against {}", self.endpoint());
        let resp = self
            .request()
            .query(&[("query", sql)])
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await
            .map_err(transport_error)?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let body = body.trim();

        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || body.contains("AUTHENTICATION_FAILED")
            || body.contains("REQUIRED_PASSWORD")
        {
            error!("ClickHouse rejected credentials: {}", body);
            return Err(BridgeError::Authentication);
        }
        if status == StatusCode::NOT_FOUND || body.contains("UNKNOWN_TABLE") {
            return Err(BridgeError::TableNotFound(body.to_string()));
        }
        error!("ClickHouse request failed with {}: {}", status, body);
        if body.is_empty() {
            Err(BridgeError::Storage(format!("ClickHouse returned {status}")))
        } else {
            Err(BridgeError::Storage(body.to_string()))
        }
    }
}

fn transport_error(e: reqwest::Error) -> BridgeError {
    error!("ClickHouse request failed: {}", e);
    BridgeError::Storage(e.to_string())
}
