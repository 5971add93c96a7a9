//! Error type for archive operations
//!
//! Not-found is deliberately absent: lookups return `Ok(None)`. Integrity
//! concerns (missing hash metadata, divergent payloads) are logged and
//! surfaced through envelope flags rather than as errors.

use std::io::Error as IoError;

/// Error type for archive operations
#[derive(Debug)]
pub enum ArchiveError {
    /// Missing or malformed tenant id, event id or scan argument.
    /// Always raised before any store call is made.
    InvalidArgument(String),
    /// A key that does not split into exactly seven segments
    MalformedKey(String),
    /// I/O or service error from the blob store
    Store(IoError),
    /// JSON serialization/deserialization error
    Serialization(serde_json::Error),
    /// A bulk delete page where the store rejected some keys
    PartialDelete {
        prefix: String,
        requested: usize,
        deleted: usize,
        failed_keys: Vec<String>,
    },
    /// The deletion worker task is gone
    WorkerUnavailable,
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ArchiveError::MalformedKey(key) => write!(f, "Malformed archive key: {}", key),
            ArchiveError::Store(e) => write!(f, "Blob store error: {}", e),
            ArchiveError::Serialization(e) => write!(f, "JSON error: {}", e),
            ArchiveError::PartialDelete {
                prefix,
                requested,
                deleted,
                ..
            } => write!(
                f,
                "Partial delete under {}: requested {}, deleted {}",
                prefix, requested, deleted
            ),
            ArchiveError::WorkerUnavailable => write!(f, "Deletion worker unavailable"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Store(e) => Some(e),
            ArchiveError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for ArchiveError {
    fn from(e: IoError) -> Self {
        ArchiveError::Store(e)
    }
}

impl From<serde_json::Error> for ArchiveError {
    fn from(e: serde_json::Error) -> Self {
        ArchiveError::Serialization(e)
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
