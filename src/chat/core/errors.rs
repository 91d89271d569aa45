//! Error types for the chat subsystem.

use thiserror::Error;

use crate::chat::core::ids::IdentityError;

/// Chat subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The user identity could not be accepted.
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    /// An operation needs a loaded identity but none has been loaded yet.
    #[error("no identity loaded")]
    NoIdentity,
    /// The referenced thread does not exist for the current identity.
    #[error("unknown thread: {0}")]
    UnknownThread(String),
    /// The background replication worker stopped before reporting an outcome.
    #[error("remote replication worker stopped")]
    ReplicationStopped,
    /// Local cache failure other than an `SQLite` error (e.g. a poisoned lock).
    #[error("local cache error: {0}")]
    Cache(String),
    /// `SQLite` storage error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The remote API answered with a non-success status.
    #[error("remote returned status {status}: {body}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
