//! Error types for the acquisition module.

use thiserror::Error;

/// Errors that can occur while copying a source into the cache slot.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// A read or write failed part way through the copy.
    #[error("Copy failed after {bytes_copied} bytes: {source}")]
    Io {
        /// Bytes written to the destination before the failure.
        bytes_copied: u64,
        #[source]
        source: std::io::Error,
    },

    /// The source cannot be opened (again).
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The background worker thread could not be started.
    #[error("Failed to start acquisition worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The background worker went away without reporting a result.
    #[error("Acquisition worker disconnected")]
    WorkerDisconnected,
}

impl AcquireError {
    /// Bytes written before the failure, where known.
    pub fn bytes_copied(&self) -> u64 {
        match self {
            Self::Io { bytes_copied, .. } => *bytes_copied,
            Self::SourceUnavailable(_) | Self::WorkerSpawn(_) | Self::WorkerDisconnected => 0,
        }
    }
}
