//! Encode profile, ingest endpoint and the engine command line.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::MediaError;
use crate::MediaResult;

/// YouTube's primary RTMP ingest point. The stream key is appended verbatim.
pub const DEFAULT_INGEST_PREFIX: &str = "rtmp://a.rtmp.youtube.com/live2/";

/// Encoding parameters passed to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeProfile {
    /// Video codec (e.g. "libx264").
    pub video_codec: String,

    /// Encoder preset.
    pub preset: String,

    /// Target and maximum video bitrate in kbps. The rate-control buffer is
    /// twice this value.
    pub video_bitrate_kbps: u32,

    /// Output pixel format.
    pub pixel_format: String,

    /// Keyframe interval in frames.
    pub gop_size: u32,

    /// Audio codec.
    pub audio_codec: String,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,

    /// Output container format.
    pub container: String,
}

impl Default for EncodeProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "ultrafast".to_string(),
            video_bitrate_kbps: 3000,
            pixel_format: "yuv420p".to_string(),
            gop_size: 50,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            audio_sample_rate: 44100,
            container: "flv".to_string(),
        }
    }
}

impl EncodeProfile {
    /// Rate-control buffer size in kbps.
    pub fn buffer_size_kbps(&self) -> u32 {
        self.video_bitrate_kbps.saturating_mul(2)
    }
}

/// The ingest endpoint a session publishes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestEndpoint {
    prefix: String,
}

impl IngestEndpoint {
    /// Create an endpoint from a URL prefix the stream key is appended to.
    pub fn new(prefix: impl Into<String>) -> MediaResult<Self> {
        let prefix = prefix.into();

        let url = Url::parse(&prefix)
            .map_err(|e| MediaError::InvalidEndpoint(format!("{prefix}: {e}")))?;
        if url.scheme() != "rtmp" && url.scheme() != "rtmps" {
            return Err(MediaError::InvalidEndpoint(
                "URL must start with rtmp:// or rtmps://".to_string(),
            ));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(MediaError::InvalidEndpoint(format!("{prefix}: missing host")));
        }

        Ok(Self { prefix })
    }

    /// The prefix the stream key is appended to.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full publish URL for a stream key. The key is not altered or escaped.
    pub fn url_for(&self, stream_key: &str) -> String {
        format!("{}{}", self.prefix, stream_key)
    }
}

impl Default for IngestEndpoint {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_INGEST_PREFIX.to_string(),
        }
    }
}

/// Build the engine arguments that loop `input` forever to `ingest_url`.
pub fn build_stream_args(
    input: &Path,
    profile: &EncodeProfile,
    ingest_url: &str,
) -> MediaResult<Vec<String>> {
    let input = input.to_str().ok_or_else(|| {
        MediaError::InvalidInput(format!("{} is not valid UTF-8", input.display()))
    })?;

    let video_bitrate = format!("{}k", profile.video_bitrate_kbps);
    let buffer_size = format!("{}k", profile.buffer_size_kbps());
    let gop_size = profile.gop_size.to_string();
    let audio_bitrate = format!("{}k", profile.audio_bitrate_kbps);
    let sample_rate = profile.audio_sample_rate.to_string();

    let args: [&str; 28] = [
        // Read at native frame rate, loop forever
        "-re",
        "-stream_loop",
        "-1",
        "-i",
        input,
        "-c:v",
        &profile.video_codec,
        "-preset",
        &profile.preset,
        "-b:v",
        &video_bitrate,
        "-maxrate",
        &video_bitrate,
        "-bufsize",
        &buffer_size,
        "-pix_fmt",
        &profile.pixel_format,
        "-g",
        &gop_size,
        "-c:a",
        &profile.audio_codec,
        "-b:a",
        &audio_bitrate,
        "-ar",
        &sample_rate,
        "-f",
        &profile.container,
        ingest_url,
    ];

    Ok(args.iter().map(|arg| arg.to_string()).collect())
}
