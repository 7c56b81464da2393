//! Error types for DNS orchestration

use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating the DNS subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// An update arrived with a serial older than the last applied one
    #[error("not applying dns update, network update is {behind} behind the last applied update")]
    StaleUpdate {
        /// How far behind the update is
        behind: u64,
    },

    /// Malformed configuration; the update is rejected wholesale
    #[error("configuration error: {0}")]
    Config(String),

    /// DNS data-path error
    #[error(transparent)]
    Dns(#[from] weft_dns::Error),

    /// Host-manager error
    #[error(transparent)]
    Host(#[from] weft_host::Error),

    /// The server has been stopped
    #[error("dns server is stopped")]
    Stopped,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
