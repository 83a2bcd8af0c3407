//! Error types for the xDS authority.

use std::time::Duration;

use thiserror::Error;

/// Error type for xDS authority operations.
///
/// All variants are `Clone` because a single stream failure fans out to
/// every watcher of a pending resource.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The authority configuration failed validation at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The ADS stream could not be established, or broke before a response
    /// arrived. Surfaced to watchers whose resources were still pending.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server ended the ADS stream.
    #[error("ADS stream closed by server")]
    StreamClosed,

    /// No response named the resource within the configured watch expiry.
    #[error("watch for {type_url}/{name} timed out after {timeout:?}")]
    WatchExpired {
        /// Type URL of the resource that never arrived.
        type_url: String,
        /// Name of the resource that never arrived.
        name: String,
        /// The configured expiry duration.
        timeout: Duration,
    },

    /// A resource payload could not be decoded. Logged by the stream
    /// coordinator, never delivered to watchers.
    #[error("failed to decode {type_url} resource: {message}")]
    Decode {
        /// Type URL of the malformed payload.
        type_url: String,
        /// Decoder-supplied description of the failure.
        message: String,
    },
}

impl Error {
    /// Returns true for errors caused by the connection to the management
    /// server, as opposed to a per-resource failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::StreamClosed)
    }
}

/// Result type alias for xDS authority operations.
pub type Result<T> = std::result::Result<T, Error>;
