//! Error types for the dap-debug MCP server

use std::time::Duration;
use thiserror::Error;

/// Main error type for the dap-debug MCP server
#[derive(Error, Debug)]
pub enum DebugError {
    /// Caller parameters were malformed or incomplete. Raised before any I/O.
    #[error("Invalid parameters: {0}")]
    Validation(String),

    /// The connection or adapter process failed. Fatal to the session.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The adapter answered with `success: false`. The session stays usable.
    #[error("{command} failed: {message}")]
    Protocol { command: String, message: String },

    #[error("No active debug session. Use 'debug' to start one.")]
    NoActiveSession,

    #[error("Not allowed while the session is {state}: {reason}")]
    InvalidState { state: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Debug adapter launch failed: {0}")]
    LaunchFailed(String),

    #[error("Unexpected response to '{command}': {reason}")]
    UnexpectedResponse { command: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DebugError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DebugError::Validation(msg.into())
    }

    /// Errors after which the connection can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DebugError::Transport(_) | DebugError::Timeout(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DebugError>;

/// Connection-level failures.
///
/// Cloneable so a single terminal failure can be delivered to every request
/// still waiting on the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed by debug adapter")]
    ConnectionClosed,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("Connection shut down")]
    Shutdown,
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
            _ => TransportError::Io(error.to_string()),
        }
    }
}
