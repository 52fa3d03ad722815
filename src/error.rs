//! Error types for sync operations.

use std::io;
use thiserror::Error;

/// Errors that can abort a sync pass.
///
/// Per-item transfer failures are not represented here; they are recorded as
/// [`TransferStatus::Failed`](crate::types::TransferStatus::Failed) outcomes
/// and never stop the pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Required connection parameters are missing.
    #[error("R2 config incomplete, missing: {}", missing.join(", "))]
    Config {
        /// Names of the missing parameters.
        missing: Vec<String>,
    },

    /// The remote listing call failed.
    #[error("Remote listing failed under '{prefix}': {message}")]
    Listing {
        /// Prefix that was being listed.
        prefix: String,
        /// Error reported by the store.
        message: String,
    },

    /// Opaque object store failure.
    #[error("Object store error: {0}")]
    Store(String),

    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// A transfer task could not be driven to completion.
    #[error("Transfer task failed: {0}")]
    TransferFailed(String),
}

impl SyncError {
    /// Returns true when retrying the operation cannot change its result.
    ///
    /// Local filesystem problems (missing source, permission denied) are
    /// permanent; everything the store reports is assumed transient.
    pub fn is_permanent(&self) -> bool {
        match self {
            SyncError::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            SyncError::Config { .. } | SyncError::SerdeJsonError(_) => true,
            SyncError::Listing { .. } | SyncError::Store(_) | SyncError::TransferFailed(_) => {
                false
            }
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
