use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{
    error::BridgeError,
    models::{CsvDownload, TableInfo, TablePreview},
    ports::{RowStore, SchemaStore},
};

/// Preview shows a sample by default; export means the whole table.
const DEFAULT_PREVIEW_ROWS: u64 = 10;

pub struct ExportService {
    schema_store: Arc<dyn SchemaStore>,
    row_store: Arc<dyn RowStore>,
}

impl ExportService {
    pub fn new(schema_store: Arc<dyn SchemaStore>, row_store: Arc<dyn RowStore>) -> Self {
        Self {
            schema_store,
            row_store,
        }
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, BridgeError> {
        let tables = self.schema_store.list_tables().await?;
        debug!("Found {} tables", tables.len());
        Ok(tables)
    }

    pub async fn table_columns(&self, table: &str) -> Result<Vec<String>, BridgeError> {
        self.schema_store.table_columns(table).await
    }

    /// A bounded structured sample of `table`. `rows` of 0 or absent means
    /// ten rows; `cols` selects the leading columns.
    pub async fn preview(
        &self,
        table: &str,
        rows: Option<u64>,
        cols: Option<usize>,
    ) -> Result<TablePreview, BridgeError> {
        let limit = rows.filter(|r| *r > 0).unwrap_or(DEFAULT_PREVIEW_ROWS);
        let selected = self.selected_columns(table, cols).await?;
        let rows = self
            .row_store
            .select_rows(table, &selected, Some(limit))
            .await?;
        info!("Previewing {} rows of {}", rows.len(), table);
        Ok(TablePreview {
            columns: selected,
            rows,
        })
    }

    /// The table streamed back as CSV with a header line. Unlike `preview`,
    /// `rows` of 0 or absent means no limit at all.
    pub async fn export(
        &self,
        table: &str,
        rows: Option<u64>,
        cols: Option<usize>,
    ) -> Result<CsvDownload, BridgeError> {
        let limit = rows.filter(|r| *r > 0);
        let selected = self.selected_columns(table, cols).await?;
        let content = self.row_store.select_csv(table, &selected, limit).await?;
        info!("Exporting {} ({} columns, limit {:?})", table, selected.len(), limit);
        Ok(CsvDownload {
            filename: format!("{table}.csv"),
            content,
        })
    }

    pub async fn table_info(&self, table: &str) -> Result<TableInfo, BridgeError> {
        let columns = self.schema_store.table_columns(table).await?;
        let row_count = self.row_store.count_rows(table).await?;
        Ok(TableInfo {
            col_count: columns.len(),
            row_count,
        })
    }

    async fn selected_columns(
        &self,
        table: &str,
        cols: Option<usize>,
    ) -> Result<Vec<String>, BridgeError> {
        let all = self.schema_store.table_columns(table).await?;
        Ok(match cols {
            Some(limit) => all.into_iter().take(limit).collect(),
            None => all,
        })
    }
}
