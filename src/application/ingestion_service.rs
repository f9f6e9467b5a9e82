use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::domain::{
    error::BridgeError,
    models::{IngestReport, IngestionWindow},
    ports::{RowStore, SchemaStore},
};
use crate::infrastructure::csv;

pub struct IngestionService {
    schema_store: Arc<dyn SchemaStore>,
    row_store: Arc<dyn RowStore>,
}

impl IngestionService {
    pub fn new(schema_store: Arc<dyn SchemaStore>, row_store: Arc<dyn RowStore>) -> Self {
        Self {
            schema_store,
            row_store,
        }
    }

    /// Ingest a windowed slice of a CSV file into `table`, creating the
    /// table from the header when it does not exist yet.
    ///
    /// Rows already inserted stay in the table if a later row fails; the
    /// caller owns the source file and its cleanup.
    pub async fn ingest_file(
        &self,
        path: &Path,
        table: &str,
        window: IngestionWindow,
    ) -> Result<IngestReport, BridgeError> {
        info!("Starting CSV ingestion into table: {}", table);
        debug!(
            "Window - start_row: {}, row_limit: {:?}, col_limit: {:?}",
            window.start_row, window.row_limit, window.col_limit
        );

        debug!("Step 1: Reading CSV header from {}", path.display());
        let all_columns = csv::read_header(path).await.map_err(|e| {
            error!("Failed to read CSV header: {}", e);
            e
        })?;
        let selected: Vec<String> = match window.col_limit {
            Some(limit) => all_columns.iter().take(limit).cloned().collect(),
            None => all_columns.clone(),
        };
        info!(
            "Header has {} columns, ingesting {}",
            all_columns.len(),
            selected.len()
        );

        debug!("Step 2: Ensuring table {} exists", table);
        self.schema_store
            .ensure_table(table, &selected)
            .await
            .map_err(|e| {
                error!("Failed to ensure table {}: {}", table, e);
                e
            })?;

        debug!("Step 3: Streaming windowed rows into {}", table);
        let rows_seen = Arc::new(AtomicU64::new(0));
        let stream = csv::windowed_data_stream(path, window.clone(), rows_seen.clone()).await?;
        self.row_store
            .insert_rows(table, &selected, stream)
            .await
            .map_err(|e| {
                error!("Bulk insert into {} failed: {}", table, e);
                e
            })?;

        let total = rows_seen.load(Ordering::Relaxed);
        let available = total.saturating_sub(window.start_row.saturating_sub(1));
        let rows_written = match window.row_limit {
            Some(limit) => limit.min(available),
            None => available,
        };

        info!(
            "✅ Ingested {} rows ({} columns) into {}",
            rows_written,
            selected.len(),
            table
        );
        Ok(IngestReport {
            table: table.to_string(),
            rows_written,
            cols_written: selected.len(),
        })
    }
}
