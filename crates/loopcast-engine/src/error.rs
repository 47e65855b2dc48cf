//! Error types for the session controller.

use loopcast_media::MediaError;
use thiserror::Error;

/// Errors that can occur when starting a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request was invalid (e.g. empty stream key). Nothing was started.
    #[error("{0}")]
    Validation(String),

    /// A session is already starting or streaming.
    #[error("A stream is already running")]
    AlreadyActive,

    /// No acquired video is available yet.
    #[error("Video not ready: {0}")]
    NotReady(String),

    /// The media engine could not be launched.
    #[error("Engine launch failed: {0}")]
    Launch(#[from] MediaError),
}
