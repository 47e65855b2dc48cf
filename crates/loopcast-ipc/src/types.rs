//! Common types used across engine messages.

use serde::{Deserialize, Serialize};

/// Live session metrics, mostly parsed from the media engine's progress lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Frames encoded since the engine started.
    pub frames: u64,

    /// Encoding frames per second as reported by the engine.
    pub fps: f32,

    /// Output bitrate in kbps as reported by the engine.
    pub bitrate_kbps: f32,

    /// Target video bitrate in kbps.
    pub target_bitrate_kbps: u32,

    /// Encoding speed relative to real time (1.0 = real time).
    pub speed: f32,

    /// Media time encoded so far, in seconds.
    pub media_time_seconds: f64,

    /// Number of log lines received from the engine.
    pub log_lines: u64,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}

/// Types of performance warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// The engine encodes slower than real time, so the stream will stall.
    FallingBehind { speed: f32 },

    /// The engine has reported no progress for a while.
    Stalled { idle_seconds: u64 },
}
