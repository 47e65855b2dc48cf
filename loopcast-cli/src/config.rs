//! Configuration file and layered loading.
//!
//! Precedence: defaults < config file < CLI flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use loopcast_acquire::{AcquireConfig, RetryPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS};
use loopcast_engine::{EngineConfig, CACHE_FILE_NAME};
use loopcast_media::{EncodeProfile, IngestEndpoint, DEFAULT_INGEST_PREFIX};

/// Shortest metrics interval accepted from a config file.
const MIN_METRICS_INTERVAL_MS: u64 = 100;

/// Default location of the config file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("loopcast").join("config.toml"))
}

/// Fully resolved configuration after all layers merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopcastConfig {
    /// ffmpeg binary.
    pub ffmpeg_path: PathBuf,

    /// Ingest URL prefix; the stream key is appended verbatim.
    pub ingest_prefix: String,

    /// Where the selected video is cached. Platform cache dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Copy chunk size in bytes.
    pub chunk_size: usize,

    /// Copy attempts before giving up.
    pub acquire_attempts: u32,

    /// Metrics reporting interval while streaming.
    pub metrics_interval_ms: u64,

    pub profile: EncodeProfile,
}

impl Default for LoopcastConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ingest_prefix: DEFAULT_INGEST_PREFIX.to_string(),
            cache_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            acquire_attempts: DEFAULT_MAX_ATTEMPTS,
            metrics_interval_ms: 1000,
            profile: EncodeProfile::default(),
        }
    }
}

impl LoopcastConfig {
    /// Load the config file layer.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and built-in defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                debug!("No config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Apply the CLI flag layer.
    pub fn with_overrides(mut self, ffmpeg: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        if let Some(ffmpeg) = ffmpeg {
            self.ffmpeg_path = ffmpeg;
        }
        if let Some(cache_dir) = cache_dir {
            self.cache_dir = Some(cache_dir);
        }
        self
    }

    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("loopcast")
        })
    }

    /// Validate and convert into the engine's configuration.
    pub fn into_engine_config(self) -> Result<EngineConfig> {
        let endpoint = IngestEndpoint::new(self.ingest_prefix.as_str())
            .with_context(|| format!("Invalid ingest_prefix {:?}", self.ingest_prefix))?;

        Ok(EngineConfig {
            cache_path: self.resolved_cache_dir().join(CACHE_FILE_NAME),
            acquire: AcquireConfig {
                chunk_size: self.chunk_size.max(1),
                retry: RetryPolicy::with_attempts(self.acquire_attempts),
            },
            endpoint,
            profile: self.profile,
            metrics_interval: Duration::from_millis(
                self.metrics_interval_ms.max(MIN_METRICS_INTERVAL_MS),
            ),
            ffmpeg_path: self.ffmpeg_path,
        })
    }
}
