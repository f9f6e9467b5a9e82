use serde::{Deserialize, Serialize};

use crate::domain::ports::CsvByteStream;

/// Where to reach ClickHouse: the environment defaults, or a per-request
/// override assembled from query parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Row/column slice applied to a single ingestion call.
///
/// `start_row` is a 1-based index into data rows (the header does not count).
#[derive(Debug, Clone)]
pub struct IngestionWindow {
    pub start_row: u64,
    pub row_limit: Option<u64>,
    pub col_limit: Option<usize>,
}

impl Default for IngestionWindow {
    fn default() -> Self {
        Self {
            start_row: 1,
            row_limit: None,
            col_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub table: String,
    pub rows_written: u64,
    pub cols_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub col_count: usize,
    pub row_count: u64,
}

/// A streamed CSV export plus the filename it should be saved under.
pub struct CsvDownload {
    pub filename: String,
    pub content: CsvByteStream,
}
