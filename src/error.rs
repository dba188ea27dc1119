//! Error types for the sharded client.

use thiserror::Error;

/// Result type alias for sharded client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sharded client.
///
/// A pipeline stores a copy in every failed slot and returns the first one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The command cannot be routed under sharding: several keys that may
    /// live on different shards, or a global-scope command.
    #[error("unsupported operation {command}: {reason}")]
    UnsupportedOperation {
        command: &'static str,
        reason: String,
    },

    /// A pipeline batch was rejected before dispatch.
    #[error("invalid command #{index} ({command}) in pipeline: {reason}")]
    InvalidCommand {
        index: usize,
        command: &'static str,
        reason: String,
    },

    /// The backend connection for the resolved shard failed at connection level.
    #[error("shard {shard} unavailable: {reason}")]
    ShardUnavailable { shard: String, reason: String },

    /// The backend answered the command with an error.
    #[error("backend error: {0}")]
    Backend(BackendError),

    /// A failover notification that does not change the known address.
    ///
    /// Absorbed by the failover watcher, never returned by the routers.
    #[error("stale failover event for shard {shard} at {address}")]
    StaleFailoverEvent { shard: String, address: String },

    /// No shard registered under this id.
    #[error("shard not found: {0}")]
    ShardNotFound(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The backend reply does not have the shape the command expects.
    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: String,
    },

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Translate a backend error raised by shard `shard`.
    ///
    /// Connection-level failures become [`Error::ShardUnavailable`], anything
    /// else is carried verbatim in [`Error::Backend`].
    pub fn from_backend(shard: &str, err: BackendError) -> Self {
        if err.is_connection_error() {
            Error::ShardUnavailable {
                shard: shard.to_string(),
                reason: err.to_string(),
            }
        } else {
            Error::Backend(err)
        }
    }

    /// Check if the error was raised before any backend was contacted.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedOperation { .. } | Error::InvalidCommand { .. }
        )
    }

    pub(crate) fn unsupported(command: &'static str, reason: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            command,
            reason: reason.into(),
        }
    }
}

/// Errors reported by a backend connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Could not reach the backend, or the connection broke mid-call.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,

    /// Operation against a key holding the wrong kind of value.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Any other error reply from the backend.
    #[error("{0}")]
    Response(String),
}

impl BackendError {
    /// Check if this error means the backend could not be talked to at all.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, BackendError::Connection(_) | BackendError::Closed)
    }
}
