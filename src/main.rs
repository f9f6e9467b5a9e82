use csv_bridge::http_service::HttpService;
use tracing::{info, debug};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing with debug level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("csv_bridge=debug".parse().unwrap())
            .add_directive("tower_http=info".parse().unwrap())
            .add_directive("reqwest=warn".parse().unwrap()))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting CSV bridge server");
    debug!("Environment variables: CLICKHOUSE_URL={}, CLICKHOUSE_DB={}, PORT={}",
        std::env::var("CLICKHOUSE_URL").unwrap_or_else(|_| "not set".to_string()),
        std::env::var("CLICKHOUSE_DB").unwrap_or_else(|_| "not set".to_string()),
        std::env::var("PORT").unwrap_or_else(|_| "not set".to_string())
    );

    let service = HttpService::new().await?;
    info!("HTTP service initialized successfully");

    service.run().await
}
