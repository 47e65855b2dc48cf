//! Session controller and command loop for loopcast.
//!
//! This crate ties acquisition and the media engine together: the
//! [`SessionController`] owns the lifecycle of one streaming session, and the
//! [`Engine`] runs the command loop a front end talks to over channels.

mod config;
mod controller;
mod error;
mod metrics;
mod observer;
mod orchestrator;

#[cfg(test)]
mod testing;

pub use config::{EngineConfig, CACHE_FILE_NAME};
pub use controller::{SessionController, SessionHandle};
pub use error::SessionError;
pub use metrics::{MetricsCollector, ProgressSample};
pub use observer::{ChannelObserver, SessionObserver};
pub use orchestrator::Engine;

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use loopcast_ipc::{EngineCommand, EngineEvent};
use loopcast_media::FfmpegEngine;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Create an engine instance backed by ffmpeg.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    config: EngineConfig,
) -> Engine {
    let media = Arc::new(FfmpegEngine::new(config.ffmpeg_path.clone()));
    Engine::new(command_rx, event_tx, config, media)
}
