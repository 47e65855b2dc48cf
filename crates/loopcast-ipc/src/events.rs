//! Events sent from the engine to the front end.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::state::SessionState;
use crate::types::{StreamMetrics, WarningType};

/// Events that the engine can send to the front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine is ready to accept commands.
    Ready,

    /// A copy into the cache slot has begun.
    AcquireStarted {
        /// Description of the source being copied.
        source: String,
    },

    /// The copy finished and the cached file can be streamed.
    Acquired {
        /// Path of the cached copy.
        path: PathBuf,

        /// Number of bytes written.
        bytes_copied: u64,
    },

    /// The copy failed; nothing is ready to stream.
    AcquireFailed {
        /// Bytes written before the failure.
        bytes_copied: u64,

        /// Error message.
        message: String,
    },

    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// A log line from the media engine.
    Progress { message: String },

    /// The session has ended. Always the last event of a session.
    SessionEnded { success: bool },

    /// Updated stream metrics.
    Metrics(StreamMetrics),

    /// Performance warning detected.
    PerformanceWarning(WarningType),

    /// A command was rejected or failed.
    Error {
        /// Whether the user can simply try again.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// Engine has shut down.
    Shutdown,
}
