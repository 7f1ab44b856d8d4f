//! Error types for the bossfight core library.

use thiserror::Error;

/// Top-level error type for all bossfight operations.
#[derive(Error, Debug)]
pub enum BossError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure (ledger payloads, stored ids).
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error. Fatal at startup, never raised at tick time.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ingestion input outside the accepted domain (negative seconds, negative wager).
    #[error("Invalid input: {field} = {value}")]
    InvalidInput {
        /// Which input field was rejected.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// A scope with the given ID does not exist.
    #[error("Scope not found: {0}")]
    UnknownScope(crate::ScopeId),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, BossError>;
