//! Error types for mnemo-core

use thiserror::Error;

/// Result type alias using mnemo-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mnemo-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Anki (or its connector add-on) is not reachable on the configured port
    #[error("Anki is not running: {0}. Start Anki and make sure the AnkiConnect add-on is installed and enabled.")]
    NotRunning(String),

    /// Request exceeded the configured timeout
    #[error("Request to Anki timed out: {0}. Anki may be busy with a long operation; try again.")]
    Timeout(String),

    /// Other transport-level failure
    #[error("Network error talking to Anki: {0}")]
    Network(String),

    /// Malformed or unsupported response from the peer
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Application-level error reported by the peer, message verbatim
    #[error("Anki reported an error: {0}")]
    Remote(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record, schema, mapping, or backup not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local store error
    #[error("Store error: {0}")]
    Store(String),

    /// A sync run is already in flight
    #[error("A sync run is already in progress")]
    SyncInFlight,

    /// The run was cancelled cooperatively
    #[error("Sync run cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a transport failure the connection supervisor
    /// should retry, as opposed to a fatal protocol/application error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NotRunning(_) | Self::Timeout(_) | Self::Network(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_connect() {
            Self::NotRunning(error.to_string())
        } else {
            Self::Network(error.to_string())
        }
    }
}
