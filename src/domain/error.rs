use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication failed: password required or incorrect.")]
    Authentication,

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
