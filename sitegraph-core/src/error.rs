use sitegraph_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Invalid boundary regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("Website record {0} not found")]
    RecordNotFound(i64),

    #[error("Crawl of {0} produced no nodes")]
    EmptyCrawl(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
