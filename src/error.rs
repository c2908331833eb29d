//! Error types for the Turnstile admission core.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Main error type for Turnstile setup and infrastructure operations.
///
/// Caller-facing admission outcomes live in [`crate::admission::Rejection`];
/// this type covers everything that goes wrong before a request is served.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger store errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
