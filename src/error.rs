//! Error types for shard exports.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`ExportError`].
///
/// Every failure of a run maps to exactly one kind, so a caller can decide
/// what to report without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A shard could not be reached or refused the connection.
    Connection,
    /// A query failed or one of its rows could not be decoded.
    Query,
    /// An output file could not be opened or written.
    Write,
    /// A file could not be archived or the archive could not be written.
    Archive,
    /// The configuration file is missing or malformed.
    Config,
    /// Internal coordination failure (closed queue, aborted worker, poisoned lock).
    Internal,
}

/// The main error type for shard exports.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The shard is unreachable or rejected authentication.
    #[error("shard {shard_id}: connection failed: {message}")]
    Connection { shard_id: usize, message: String },

    /// The query was rejected or a row could not be decoded.
    #[error("shard {shard_id}: query failed: {message}")]
    Query { shard_id: usize, message: String },

    /// An output file could not be opened, locked or written.
    #[error("write to '{}' failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A source file was unreadable or the archive could not be written.
    #[error("archive '{}' failed: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A row did not match the shape its entity expects.
    /// The fetcher re-raises this as [`ExportError::Query`] with the shard id.
    #[error("row decode error: {0}")]
    Decode(String),

    /// Occurs when attempting to interact with a closed queue.
    #[error("Queue is closed: {0}")]
    QueueClosed(String),

    /// A worker stopped early because another part of the run failed.
    #[error("export aborted")]
    Aborted,

    /// The configuration file is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A general error occurred.
    #[error("{0}")]
    Other(String),
}

impl ExportError {
    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Connection { .. } => ErrorKind::Connection,
            ExportError::Query { .. } | ExportError::Decode(_) => ErrorKind::Query,
            ExportError::Write { .. } => ErrorKind::Write,
            ExportError::Archive { .. } => ErrorKind::Archive,
            ExportError::Config(_) => ErrorKind::Config,
            ExportError::QueueClosed(_) | ExportError::Aborted | ExportError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExportError::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExportError::Archive {
            path: path.into(),
            source,
        }
    }
}

/// A specialized Result type for shard exports.
pub type Result<T> = std::result::Result<T, ExportError>;
