//! Typed front end <-> engine messages for loopcast.
//!
//! This crate defines all the message types used for communication between
//! the command-line front end and the streaming engine.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{SessionState, StopReason};
pub use types::{StreamMetrics, WarningType};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (front end → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → front end).
///
/// ffmpeg emits a progress line roughly every half second, so this leaves
/// plenty of room for a slow reader.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
