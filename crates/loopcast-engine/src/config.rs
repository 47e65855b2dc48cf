//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use loopcast_acquire::AcquireConfig;
use loopcast_media::{EncodeProfile, IngestEndpoint};

/// File name of the cached copy inside the cache directory.
pub const CACHE_FILE_NAME: &str = "stream_temp.mp4";

/// Everything the engine needs to acquire and stream a video.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// ffmpeg binary (a path or a name on `PATH`).
    pub ffmpeg_path: PathBuf,

    /// Fixed path the selected video is copied to. Overwritten on each
    /// selection.
    pub cache_path: PathBuf,

    /// Copy tuning.
    pub acquire: AcquireConfig,

    /// Where streams are published.
    pub endpoint: IngestEndpoint,

    /// Encoding parameters.
    pub profile: EncodeProfile,

    /// How often metrics are reported while streaming.
    pub metrics_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            cache_path: std::env::temp_dir().join("loopcast").join(CACHE_FILE_NAME),
            acquire: AcquireConfig::default(),
            endpoint: IngestEndpoint::default(),
            profile: EncodeProfile::default(),
            metrics_interval: Duration::from_secs(1),
        }
    }
}
