//! Background acquisition worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::copy::{acquire_with_retry, AcquiredFile};
use crate::error::AcquireError;
use crate::retry::RetryPolicy;
use crate::source::SourceProvider;
use crate::{AcquireResult, DEFAULT_CHUNK_SIZE};

/// Copy tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Chunk size in bytes.
    pub chunk_size: usize,

    /// Attempts and backoff.
    pub retry: RetryPolicy,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// A copy running on its own thread.
///
/// The result is delivered exactly once, through [`AcquireTask::try_result`]
/// or [`AcquireTask::wait`].
pub struct AcquireTask {
    source: String,
    destination: PathBuf,
    result_rx: Receiver<AcquireResult<AcquiredFile>>,
    worker: Option<JoinHandle<()>>,
}

/// Start copying `source` into `destination` on a background thread.
pub fn spawn_acquire(
    source: Arc<dyn SourceProvider>,
    destination: PathBuf,
    config: AcquireConfig,
) -> AcquireTask {
    let description = source.describe();
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);
    let spawn_tx = result_tx.clone();
    let worker_destination = destination.clone();

    let worker = thread::Builder::new()
        .name("loopcast-acquire".into())
        .spawn(move || {
            let result = acquire_with_retry(
                source.as_ref(),
                &worker_destination,
                config.chunk_size,
                &config.retry,
            );
            if result_tx.send(result).is_err() {
                debug!("Acquisition result dropped, task was abandoned");
            }
        });

    let worker = match worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(error = %e, "Failed to spawn acquisition worker");
            report_spawn_failure(&spawn_tx, e);
            None
        }
    };
    drop(spawn_tx);

    AcquireTask {
        source: description,
        destination,
        result_rx,
        worker,
    }
}

/// Deliver a spawn failure as the task result, unless a result is already
/// queued.
fn report_spawn_failure(result_tx: &Sender<AcquireResult<AcquiredFile>>, error: std::io::Error) {
    if result_tx.try_send(Err(AcquireError::WorkerSpawn(error))).is_err() {
        debug!("Acquisition result already delivered, ignoring spawn failure");
    }
}

impl AcquireTask {
    /// Description of the source being copied.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Path being written.
    pub fn destination(&self) -> &PathBuf {
        &self.destination
    }

    /// Non-blocking poll for the result. `None` while the copy is running.
    pub fn try_result(&mut self) -> Option<AcquireResult<AcquiredFile>> {
        match self.result_rx.try_recv() {
            Ok(result) => {
                self.join_worker();
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.join_worker();
                Some(Err(AcquireError::WorkerDisconnected))
            }
        }
    }

    /// Block until the copy finishes.
    pub fn wait(mut self) -> AcquireResult<AcquiredFile> {
        let result = self
            .result_rx
            .recv()
            .unwrap_or(Err(AcquireError::WorkerDisconnected));
        self.join_worker();
        result
    }

    fn join_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
