/// Unified error types for the Storegame downloader.
use thiserror::Error;

/// Top-level error type for the Storegame system.
#[derive(Debug, Error)]
pub enum StoregameError {
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Listing error: {0}")]
    Listing(#[from] ListingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised synchronously when a download request is submitted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("A download for {0:?} is already active")]
    AlreadyActive(String),

    #[error("Invalid destination category: {0:?}")]
    InvalidCategory(String),

    #[error("Invalid item name: {0:?}")]
    InvalidItemName(String),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(String),
}

/// Errors from driving the external transfer tool.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer tool exited with {}", exit_label(.0))]
    Exited(Option<i32>),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Destination directory unavailable: {0}")]
    DestinationUnavailable(#[source] std::io::Error),

    #[error("IO error while supervising transfer: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the archive extraction tool.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction tool exited with {}", exit_label(.0))]
    Exited(Option<i32>),
}

/// Errors while fetching a remote listing. Never propagated past the lister.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Listing returned HTTP status {0}")]
    Status(u16),

    #[error("Listing request timed out")]
    Timeout,
}

/// Errors while building configuration from key/value input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Result type alias for Storegame operations.
pub type StoregameResult<T> = Result<T, StoregameError>;
