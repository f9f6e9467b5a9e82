use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::domain::error::BridgeError;

/// Transformed CSV data lines headed for a bulk insert, pulled one line at a
/// time so a slow consumer pauses the file reads upstream.
pub type CsvLineStream = BoxStream<'static, Result<String, std::io::Error>>;

/// Raw CSV bytes coming back out of the storage engine.
pub type CsvByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Idempotently create `table` with the given columns, all text-typed.
    async fn ensure_table(&self, table: &str, columns: &[String]) -> Result<(), BridgeError>;

    async fn list_tables(&self) -> Result<Vec<String>, BridgeError>;

    /// Ordered column names of an existing table. A missing table surfaces
    /// the storage engine's not-found error, never an empty list.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>, BridgeError>;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Bulk-insert `rows` into `table`, mapping values to `columns` by name
    /// via a header-inclusive text format.
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: CsvLineStream,
    ) -> Result<(), BridgeError>;

    async fn select_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<Vec<serde_json::Value>, BridgeError>;

    /// Stream `table` back as CSV with a header line, optionally limited.
    async fn select_csv(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<CsvByteStream, BridgeError>;

    async fn count_rows(&self, table: &str) -> Result<u64, BridgeError>;
}
