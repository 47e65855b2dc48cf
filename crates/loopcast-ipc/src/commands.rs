//! Commands sent from the front end to the engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Commands that the front end can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Copy the given video into the engine's cache slot.
    Acquire { source: PathBuf },

    /// Start looping the cached video to the ingest endpoint.
    Start { stream_key: String },

    /// Stop the current session.
    Stop,

    /// Request the current session state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
