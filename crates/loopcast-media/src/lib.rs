//! External media engine invocation.
//!
//! Decoding, looping, encoding and publishing are delegated to an external
//! engine (ffmpeg). This crate builds the engine command line and exposes the
//! engine as a capability: invoke it with arguments, receive its log lines
//! and finally its return code.

mod error;
mod ffmpeg;
mod log_lines;
mod profile;

pub use error::MediaError;
pub use ffmpeg::FfmpegEngine;
pub use log_lines::LogLines;
pub use profile::{build_stream_args, EncodeProfile, IngestEndpoint, DEFAULT_INGEST_PREFIX};

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// Channel capacity for engine output.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Result type for media engine operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Something the engine reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutput {
    /// One log line, in the order the engine wrote it.
    Log(String),

    /// The engine terminated. Always the last output of a run.
    Exited(ReturnCode),
}

/// How the engine terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCode {
    /// Process exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,

    /// Whether the engine was stopped through [`EngineControl::cancel`].
    pub cancelled: bool,
}

impl ReturnCode {
    /// A normal exit with the given code.
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            cancelled: false,
        }
    }

    /// A run stopped on request.
    pub fn cancelled(code: Option<i32>) -> Self {
        Self {
            code,
            cancelled: true,
        }
    }

    /// Returns true if the engine exited with code zero.
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Control over a running engine.
pub trait EngineControl: Send + Sync {
    /// Ask the engine to stop. The run still ends with an `Exited` output.
    fn cancel(&self);
}

/// A running engine invocation.
pub struct EngineRun {
    /// Log lines followed by exactly one `Exited`.
    pub output: Receiver<EngineOutput>,

    /// Handle used to stop the run early.
    pub control: Arc<dyn EngineControl>,
}

/// Trait for media engines.
pub trait MediaEngine: Send + Sync {
    /// Launch the engine with the given arguments without blocking.
    fn invoke(&self, args: &[String]) -> MediaResult<EngineRun>;

    /// Get engine name for diagnostics.
    fn name(&self) -> &'static str;
}
