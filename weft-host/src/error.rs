//! Error types for host DNS management

use thiserror::Error;

/// Result type alias for host DNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring the host's DNS
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("host DNS configuration error: {0}")]
    Config(String),

    /// A system tool failed
    #[error("command '{command}' failed: {detail}")]
    Command { command: String, detail: String },

    /// State persistence error
    #[error("state error: {0}")]
    State(String),

    /// No back end exists for this platform
    #[error("host DNS management is not supported on this platform")]
    Unsupported,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
