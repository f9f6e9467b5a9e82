pub mod export_service;
pub mod ingestion_service;
