//! ffmpeg as a child process.

use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::MediaError;
use crate::log_lines::LogLines;
use crate::{
    EngineControl, EngineOutput, EngineRun, MediaEngine, MediaResult, ReturnCode,
    OUTPUT_CHANNEL_CAPACITY,
};

/// How often the supervisor checks for exit and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the ffmpeg binary, forwarding its stderr as log lines.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: PathBuf,
}

impl FfmpegEngine {
    /// Create an engine that runs `program` (a path or a name on `PATH`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The binary this engine runs.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl MediaEngine for FfmpegEngine {
    #[instrument(name = "ffmpeg_invoke", skip(self, args), fields(program = %self.program.display()))]
    fn invoke(&self, args: &[String]) -> MediaResult<EngineRun> {
        debug!(?args, "Spawning engine");

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MediaError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        info!(pid = child.id(), "Engine started");

        let Some(stderr) = child.stderr.take() else {
            reap(&mut child);
            return Err(MediaError::MissingPipe("stderr"));
        };

        let (output_tx, output_rx) = crossbeam_channel::bounded(OUTPUT_CHANNEL_CAPACITY);
        let should_stop = Arc::new(AtomicBool::new(false));

        let reader = {
            let output_tx = output_tx.clone();
            thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || forward_log_lines(stderr, output_tx))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                reap(&mut child);
                return Err(MediaError::Io(e));
            }
        };

        // The supervisor takes the child out of the slot when it starts. If
        // the thread never runs, the child is still here to be killed.
        let slot = Arc::new(Mutex::new(Some(child)));
        let supervisor = {
            let slot = Arc::clone(&slot);
            let should_stop = Arc::clone(&should_stop);
            thread::Builder::new()
                .name("ffmpeg-supervisor".into())
                .spawn(move || {
                    let child = slot.lock().take();
                    if let Some(child) = child {
                        supervise(child, reader, should_stop, output_tx);
                    }
                })
        };
        if let Err(e) = supervisor {
            error!(error = %e, "Failed to spawn engine supervisor");
            reclaim(&slot);
            return Err(MediaError::Io(e));
        }

        Ok(EngineRun {
            output: output_rx,
            control: Arc::new(FfmpegControl { should_stop }),
        })
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

/// Cancels an ffmpeg run by killing the process.
struct FfmpegControl {
    should_stop: Arc<AtomicBool>,
}

impl EngineControl for FfmpegControl {
    fn cancel(&self) {
        debug!("Engine cancellation requested");
        self.should_stop.store(true, Ordering::SeqCst);
    }
}

fn forward_log_lines(stderr: ChildStderr, output_tx: Sender<EngineOutput>) {
    for line in LogLines::new(BufReader::new(stderr)) {
        match line {
            Ok(line) => {
                trace!(%line, "engine");
                // Keep draining after the receiver is gone so the engine
                // never blocks on a full pipe.
                let _ = output_tx.send(EngineOutput::Log(line));
            }
            Err(e) => {
                warn!(error = %e, "Failed to read engine output");
                break;
            }
        }
    }
}

/// Wait for the child to exit (killing it on cancellation), then report the
/// return code after every log line has been forwarded.
fn supervise(
    mut child: Child,
    reader: JoinHandle<()>,
    should_stop: Arc<AtomicBool>,
    output_tx: Sender<EngineOutput>,
) {
    let mut killed = false;

    let code = loop {
        if should_stop.load(Ordering::SeqCst) && !killed {
            info!("Stopping engine");
            if let Err(e) = child.kill() {
                warn!(error = %e, "Failed to kill engine");
            }
            killed = true;
        }

        match child.try_wait() {
            Ok(Some(status)) => break status.code(),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                error!(error = %e, "Failed to poll engine status");
                reap(&mut child);
                break None;
            }
        }
    };

    // stderr reaches EOF once the process is gone
    let _ = reader.join();

    let return_code = if killed {
        ReturnCode::cancelled(code)
    } else {
        ReturnCode { code, cancelled: false }
    };
    info!(?return_code, "Engine exited");

    let _ = output_tx.send(EngineOutput::Exited(return_code));
}

/// Kill and reap a child no supervisor picked up.
fn reclaim(slot: &Mutex<Option<Child>>) -> Option<ExitStatus> {
    let mut child = slot.lock().take()?;
    let _ = child.kill();
    child.wait().ok()
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
