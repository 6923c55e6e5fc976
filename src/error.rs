//! Error types for the client layer.

use thiserror::Error;

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server was unreachable, refused authentication, or the
    /// protocol handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed SQL, constraint violation, or a driver-level fault.
    #[error("Query execution error: {0}")]
    QueryExecution(String),

    /// The driver backing the requested client was not compiled in.
    #[error("Missing driver: {driver} ({hint})")]
    MissingDriver {
        driver: &'static str,
        hint: &'static str,
    },

    /// Unknown client name passed to the factory.
    #[error("Unsupported client: '{0}'. Expected: auto, blocking, or nonblocking")]
    UnsupportedClient(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Create a missing driver error.
    pub fn missing(driver: &'static str, hint: &'static str) -> Self {
        Self::MissingDriver { driver, hint }
    }

    /// Neither driver is available.
    pub fn no_driver() -> Self {
        Self::missing(
            "postgres or sqlx",
            "enable either the `blocking` feature or the `nonblocking` feature",
        )
    }

    pub(crate) fn closed() -> Self {
        Self::QueryExecution("connection is closed".to_string())
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
