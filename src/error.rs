use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// No dataset snapshot is loaded, or the persisted store is missing.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl EngineError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<polars::prelude::PolarsError> for EngineError {
    fn from(e: polars::prelude::PolarsError) -> Self {
        EngineError::Polars(e.to_string())
    }
}
