//! Error types for the media engine module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while preparing or launching the media engine.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The engine binary could not be started.
    #[error("Failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ingest endpoint prefix is not a usable RTMP URL.
    #[error("Invalid ingest endpoint: {0}")]
    InvalidEndpoint(String),

    /// Input cannot be expressed on the engine command line.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A pipe to the engine process was not available.
    #[error("Engine {0} pipe not available")]
    MissingPipe(&'static str),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
