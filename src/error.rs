use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketError {
    #[error("Dataframe operation failed: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} returned by {url}")]
    HttpStatus { status: u16, url: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Invalid trend period: {0} (expected monthly, quarterly, yearly or year_quarter)")]
    UnknownTrendPeriod(String),

    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("No download link found on {0}")]
    DownloadLinkNotFound(String),

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl MarketError {
    /// Whether a failed fetch is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            MarketError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
