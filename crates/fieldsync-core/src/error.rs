//! Error types for fieldsync-core

use thiserror::Error;

use crate::duplicate::DuplicateVerdict;
use crate::sync::{PartialSyncError, SyncOutcome};

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failure or backend unreachable
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("Backend error: {message} ({status})")]
    Backend { status: u16, message: String },

    /// Every attempted record type failed to push
    #[error("Sync failed, nothing was pushed: {}", .0.summary())]
    PushFailed(SyncOutcome),

    /// Some record types pushed while others failed
    #[error(transparent)]
    PartialSync(#[from] PartialSyncError),

    /// Push succeeded but the canonical snapshot could not be applied
    #[error("Pull failed: {0}")]
    PullFailed(String),

    /// Candidate trip looks like one already recorded (advisory)
    #[error("Possible duplicate trip: {}", .0.reason)]
    DuplicateCandidate(DuplicateVerdict),

    /// Real-time channel error
    #[error("Realtime channel error: {0}")]
    Realtime(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error came from the transport rather than local state.
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Backend { .. })
    }
}
