use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, info};

use super::client::ClickHouseClient;
use crate::domain::error::BridgeError;
use crate::domain::ports::{CsvByteStream, CsvLineStream, RowStore, SchemaStore};

/// Double any backtick inside an identifier before interpolating it into a
/// backtick-quoted position.
fn escape_identifier(name: &str) -> String {
    name.replace('`', "``")
}

fn select_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("`{}`", escape_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn limit_clause(limit: Option<u64>) -> String {
    match limit {
        Some(n) => format!(" LIMIT {n}"),
        None => String::new(),
    }
}

fn create_table_ddl(table: &str, columns: &[String]) -> String {
    let cols_def = columns
        .iter()
        .map(|c| format!("`{}` String", escape_identifier(c)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS `{}` ({}) ENGINE = MergeTree() ORDER BY tuple()",
        escape_identifier(table),
        cols_def
    )
}

// ClickHouse quotes 64-bit integers in JSON output, so the count arrives as
// either a number or a string.
fn parse_count(value: &serde_json::Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

fn names_from_rows(rows: &[serde_json::Value]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row["name"].as_str().map(str::to_string))
        .collect()
}

/// Table storage over ClickHouse: schema DDL and introspection plus streamed
/// CSV ingress/egress.
pub struct ClickHouseTableRepository {
    client: ClickHouseClient,
}

impl ClickHouseTableRepository {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SchemaStore for ClickHouseTableRepository {
    async fn ensure_table(&self, table: &str, columns: &[String]) -> Result<(), BridgeError> {
        let ddl = create_table_ddl(table, columns);
        info!("Running DDL: {}", ddl);
        self.client.execute(&ddl).await?;
        info!("✅ Table `{}` ready or already existed", table);
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, BridgeError> {
        let result = self.client.fetch_json("SHOW TABLES").await?;
        Ok(names_from_rows(&result.data))
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>, BridgeError> {
        let sql = format!("DESCRIBE TABLE `{}`", escape_identifier(table));
        let result = self.client.fetch_json(&sql).await?;
        debug!("Table {} has {} columns", table, result.data.len());
        Ok(names_from_rows(&result.data))
    }
}

#[async_trait]
impl RowStore for ClickHouseTableRepository {
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: CsvLineStream,
    ) -> Result<(), BridgeError> {
        // CSVWithNames maps values to columns through this prepended header
        let mut header = columns
            .iter()
            .map(|c| escape_identifier(c))
            .collect::<Vec<_>>()
            .join(",");
        header.push('\n');

        let body: CsvLineStream =
            Box::pin(stream::once(async move { Ok::<_, std::io::Error>(header) }).chain(rows));

        let sql = format!(
            "INSERT INTO `{}` FORMAT CSVWithNames",
            escape_identifier(table)
        );
        self.client.insert(&sql, body).await
    }

    async fn select_rows(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<Vec<serde_json::Value>, BridgeError> {
        let sql = format!(
            "SELECT {} FROM `{}`{}",
            select_list(columns),
            escape_identifier(table),
            limit_clause(limit)
        );
        let result = self.client.fetch_json(&sql).await?;
        Ok(result.data)
    }

    async fn select_csv(
        &self,
        table: &str,
        columns: &[String],
        limit: Option<u64>,
    ) -> Result<CsvByteStream, BridgeError> {
        let sql = format!(
            "SELECT {} FROM `{}`{}",
            select_list(columns),
            escape_identifier(table),
            limit_clause(limit)
        );
        self.client.fetch_csv(&sql).await
    }

    async fn count_rows(&self, table: &str) -> Result<u64, BridgeError> {
        let sql = format!("SELECT count() AS cnt FROM `{}`", escape_identifier(table));
        let result = self.client.fetch_json(&sql).await?;
        let row = result.data.into_iter().next().unwrap_or_default();
        Ok(parse_count(&row["cnt"]))
    }
}
