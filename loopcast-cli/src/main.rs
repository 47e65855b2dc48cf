//! `loopcast`: loop a local video file to a live RTMP ingest endpoint.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loopcast_engine::SessionController;
use loopcast_media::build_stream_args;

mod cli;
mod config;
mod stream;

use cli::{CliArgs, Command};
use config::LoopcastConfig;
use stream::{run_stream, StreamOptions};

/// Shown in place of the stream key unless `--show-key` is given.
const KEY_MASK: &str = "****";

fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            error!(error = ?e, "loopcast failed");
            ExitCode::from(2)
        }
    }
}

/// Initialize logging. Logs go to stderr; stdout carries the readout.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "loopcast={level},loopcast_engine={level},loopcast_acquire={level},loopcast_media={level}",
            level = default_level
        )
        .into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(args: CliArgs) -> Result<bool> {
    let config = LoopcastConfig::load(args.config.as_deref())?
        .with_overrides(args.ffmpeg, args.cache_dir);
    debug!(?config, "Effective configuration");

    match args.command {
        Command::Stream { video, key, json } => {
            info!(%video, "loopcast starting");
            let engine_config = config.into_engine_config()?;
            run_stream(
                engine_config,
                StreamOptions {
                    video,
                    stream_key: key.stream_key,
                    json,
                },
            )
        }
        Command::Args {
            video,
            key,
            show_key,
        } => {
            print_stream_args(config, &video, &key.stream_key, show_key)?;
            Ok(true)
        }
        Command::Config => {
            let mut config = config;
            config.cache_dir = Some(config.resolved_cache_dir());
            write!(std::io::stdout().lock(), "{}", config.to_toml()?)
                .context("Failed to write configuration")?;
            Ok(true)
        }
    }
}

fn print_stream_args(
    config: LoopcastConfig,
    video: &Path,
    stream_key: &str,
    show_key: bool,
) -> Result<()> {
    let stream_key = SessionController::validate_credential(stream_key)?;
    let shown_key = if show_key { stream_key } else { KEY_MASK };

    let engine_config = config.into_engine_config()?;
    let url = engine_config.endpoint.url_for(shown_key);
    let args = build_stream_args(video, &engine_config.profile, &url)
        .with_context(|| format!("Cannot stream {}", video.display()))?;

    let mut line = vec![quote(&engine_config.ffmpeg_path.to_string_lossy())];
    line.extend(args.iter().map(|arg| quote(arg)));
    writeln!(std::io::stdout().lock(), "{}", line.join(" "))
        .context("Failed to write command line")?;
    Ok(())
}

/// Quote an argument for display if a shell would split it.
fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
