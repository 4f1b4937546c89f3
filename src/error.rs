use thiserror::Error;

/// Errors produced by the trading core and its adapters
///
/// Per-tick and per-candle variants (`Feed`, `StaleData`, `IndicatorUndefined`,
/// `OrderRejected`, `OrderTimeout`, `Persistence`) are recovered inside the pipeline.
/// Only `Config` is fatal, and only at startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed feed event: {0}")]
    Feed(String),

    #[error("stale trade: bucket {bucket} is before open bucket {open_bucket}")]
    StaleData { bucket: i64, open_bucket: i64 },

    #[error("indicator {0} undefined: insufficient history")]
    IndicatorUndefined(&'static str),

    #[error("order rejected ({code}): {message}")]
    OrderRejected { code: String, message: String },

    #[error("order request timed out after {0}s")]
    OrderTimeout(u64),

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl Error {
    /// True for errors the pipeline drops and moves past
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_))
    }
}
