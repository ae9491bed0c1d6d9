//! Unified error types for Page-Harvest

use crate::fetch::FetchError;
use thiserror::Error;

/// Unified Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Page-Harvest
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed URL or markup source supplied at construction
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The engine reported a failure while running a query program
    #[error("Script execution failed: {0}")]
    ScriptExecutionFailed(String),

    /// The engine returned a value of a different shape than requested
    #[error("Unexpected result type: expected {expected}, received {received}")]
    UnexpectedResultType {
        /// Shape the caller asked for
        expected: String,
        /// Shape the engine produced
        received: String,
    },

    /// The session was torn down before or during the operation
    #[error("Session closed")]
    SessionClosed,

    /// WebSocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// CDP protocol errors
    #[error("CDP error: {0}")]
    Cdp(String),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Fetcher validation errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Timeout
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a new invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new script execution failed error
    pub fn script_execution_failed<S: Into<String>>(msg: S) -> Self {
        Error::ScriptExecutionFailed(msg.into())
    }

    /// Create a new unexpected result type error
    pub fn unexpected_result_type<E: Into<String>, R: Into<String>>(expected: E, received: R) -> Self {
        Error::UnexpectedResultType {
            expected: expected.into(),
            received: received.into(),
        }
    }

    /// Create a new WebSocket error
    pub fn websocket<S: Into<String>>(msg: S) -> Self {
        Error::WebSocket(msg.into())
    }

    /// Create a new CDP error
    pub fn cdp<S: Into<String>>(msg: S) -> Self {
        Error::Cdp(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Error::Timeout(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether the error was produced by the engine while running a program,
    /// as opposed to a transport or lifecycle failure.
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            Error::ScriptExecutionFailed(_) | Error::UnexpectedResultType { .. }
        )
    }
}
