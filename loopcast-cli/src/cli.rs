use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "loopcast",
    version,
    about = "Loop a local video file to a live RTMP ingest endpoint",
    long_about = "Copies the selected video into a local cache, then hands it to ffmpeg,\n\
                  which re-encodes it in an endless loop and publishes it to the ingest\n\
                  endpoint (YouTube Live by default) under your stream key."
)]
pub struct CliArgs {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file (default: <config dir>/loopcast/config.toml if present)"
    )]
    pub config: Option<PathBuf>,

    /// ffmpeg binary override
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "ffmpeg binary to run (path or name on PATH)"
    )]
    pub ffmpeg: Option<PathBuf>,

    /// Cache directory override
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "Directory the selected video is copied into before streaming"
    )]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy a video and stream it until ffmpeg exits or Ctrl-C
    Stream {
        /// Video file to stream, or "-" to read it from stdin
        #[arg(value_name = "VIDEO")]
        video: String,

        #[command(flatten)]
        key: KeyArg,

        /// Print engine events as JSON lines instead of a status readout
        #[arg(long)]
        json: bool,
    },

    /// Print the ffmpeg command line that would be run
    Args {
        #[arg(value_name = "VIDEO")]
        video: PathBuf,

        #[command(flatten)]
        key: KeyArg,

        /// Print the stream key instead of masking it
        #[arg(long)]
        show_key: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(clap::Args, Debug)]
pub struct KeyArg {
    /// Stream key issued by the ingest service
    #[arg(
        short,
        long = "key",
        env = "LOOPCAST_STREAM_KEY",
        hide_env_values = true,
        default_value = "",
        hide_default_value = true
    )]
    pub stream_key: String,
}
