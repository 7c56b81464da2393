//! Error types for DNS operations

use thiserror::Error;

/// Result type alias for DNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during DNS operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unparseable domain name
    #[error("invalid domain name '{0}'")]
    InvalidDomain(String),

    /// Malformed record data
    #[error("invalid record data: {0}")]
    InvalidRecord(String),

    /// DNS configuration error
    #[error("DNS configuration error: {0}")]
    Config(String),

    /// DNS wire-format error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::error::ProtoError),

    /// Query forwarding error
    #[error("upstream error: {0}")]
    Upstream(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service is shutting down
    #[error("service is shutting down")]
    Shutdown,
}
