//! Error types for mird-core

use thiserror::Error;

/// Main error type for the mird-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error while talking to the collector endpoint
    #[error("collector error: {0}")]
    Collector(String),

    /// Failure persisting records on the collector side
    #[error("storage error: {0}")]
    Storage(String),

    /// Session summary delivery failed
    #[error("mail error: {0}")]
    Mail(String),

    /// Country lookup failed
    #[error("geo lookup error: {0}")]
    Geo(String),
}

/// Result type alias for mird-core
pub type Result<T> = std::result::Result<T, Error>;
