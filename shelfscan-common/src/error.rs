//! Common error types for ShelfScan

use thiserror::Error;

/// Common result type for ShelfScan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across ShelfScan services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Registry and cache disagree after a failed compensating write
    #[error("Data consistency error: {0}")]
    Consistency(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Message fragments that mark a failure as worth retrying.
///
/// Classification is by message content, not by error variant: a timeout
/// surfaces differently depending on which layer hit it, but the wording
/// is stable across drivers.
const TRANSIENT_INDICATORS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "reset by peer",
    "temporarily unavailable",
    "database is locked",
    "try again",
];

impl Error {
    /// Whether this failure is likely to succeed on retry.
    ///
    /// Constraint violations (duplicate barcode, invalid input) are never
    /// transient; connectivity hiccups and lock contention are.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidInput(_) | Error::Consistency(_) => false,
            Error::NotFound(_) => false,
            _ => {
                let msg = self.to_string().to_lowercase();
                TRANSIENT_INDICATORS.iter().any(|ind| msg.contains(ind))
            }
        }
    }
}
