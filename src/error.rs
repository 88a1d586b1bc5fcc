//! Error types for outbound.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by the queue, the sync engine and the CLI.
#[derive(Debug, Error)]
pub enum OutboundError {
    /// Configuration could not be read, parsed or resolved.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database could not be opened, migrated or read.
    #[error("Database error: {0}")]
    Database(String),

    /// A queue mutation could not be made durable. The in-memory queue was
    /// left unchanged.
    #[error("Failed to persist queue: {0}")]
    StorageWrite(String),

    /// The persisted queue was written by a newer build.
    #[error("Queue format v{found} is newer than supported v{supported}")]
    UnsupportedFormat { found: i64, supported: i64 },

    /// A referenced item or record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested action cannot be expressed as queue operations.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// A call to the remote persistence service failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
