//! Chunked copy of a source into the cache slot.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, instrument, warn};

use crate::error::AcquireError;
use crate::retry::RetryPolicy;
use crate::source::SourceProvider;
use crate::AcquireResult;

/// A fully written copy that is safe to hand to the media engine.
///
/// Only a successful acquisition can produce one, so a path that is still
/// being written (or was left behind by a failed copy) can never reach a
/// streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredFile {
    path: PathBuf,
    bytes_copied: u64,
}

impl AcquiredFile {
    /// Path of the copy.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the copy in bytes.
    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }
}

/// Copy `reader` into `writer` in chunks of `chunk_size` bytes until EOF.
///
/// Returns the number of bytes copied. On failure the error carries the
/// number of bytes written before it happened.
pub fn copy_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    chunk_size: usize,
) -> AcquireResult<u64> {
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut bytes_copied: u64 = 0;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(AcquireError::Io {
                    bytes_copied,
                    source,
                })
            }
        };

        writer
            .write_all(&buffer[..read])
            .map_err(|source| AcquireError::Io {
                bytes_copied,
                source,
            })?;
        bytes_copied += read as u64;
    }

    writer.flush().map_err(|source| AcquireError::Io {
        bytes_copied,
        source,
    })?;

    Ok(bytes_copied)
}

/// Copy `source` into `destination` in a single attempt.
pub fn acquire(
    source: &dyn SourceProvider,
    destination: &Path,
    chunk_size: usize,
) -> AcquireResult<AcquiredFile> {
    acquire_with_retry(source, destination, chunk_size, &RetryPolicy::single_attempt())
}

/// Copy `source` into `destination`, retrying according to `policy`.
///
/// Every attempt reopens the source and truncates the destination. When the
/// last attempt fails the partial destination is removed.
#[instrument(name = "acquire", skip(source, policy), fields(source = %source.describe()))]
pub fn acquire_with_retry(
    source: &dyn SourceProvider,
    destination: &Path,
    chunk_size: usize,
    policy: &RetryPolicy,
) -> AcquireResult<AcquiredFile> {
    let mut attempt: u32 = 0;
    let mut last_error: Option<AcquireError> = None;

    loop {
        attempt += 1;

        match copy_once(source, destination, chunk_size) {
            Ok(bytes_copied) => {
                info!(bytes_copied, attempt, "Source acquired");
                return Ok(AcquiredFile {
                    path: destination.to_path_buf(),
                    bytes_copied,
                });
            }
            // One-shot sources cannot be reopened; report the failure that
            // consumed them instead.
            Err(e @ AcquireError::SourceUnavailable(_)) => {
                discard_partial(destination);
                return Err(last_error.unwrap_or(e));
            }
            Err(e) => {
                warn!(attempt, error = %e, "Copy attempt failed");
                discard_partial(destination);

                if !policy.should_retry(attempt) {
                    return Err(e);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(?delay, "Retrying copy");
                last_error = Some(e);
                thread::sleep(delay);
            }
        }
    }
}

fn copy_once(source: &dyn SourceProvider, destination: &Path, chunk_size: usize) -> AcquireResult<u64> {
    let mut reader = source.open()?;

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| AcquireError::Io {
                bytes_copied: 0,
                source,
            })?;
        }
    }

    let mut file = File::create(destination).map_err(|source| AcquireError::Io {
        bytes_copied: 0,
        source,
    })?;

    let bytes_copied = copy_stream(&mut reader, &mut file, chunk_size)?;

    file.sync_all().map_err(|source| AcquireError::Io {
        bytes_copied,
        source,
    })?;

    Ok(bytes_copied)
}

fn discard_partial(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => debug!(path = %destination.display(), "Removed partial copy"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %destination.display(), error = %e, "Failed to remove partial copy"),
    }
}
