//! The `stream` command: drives the engine over its channels and prints a
//! status readout.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, info, warn};

use loopcast_acquire::{OnceSource, SourceProvider};
use loopcast_engine::{create_engine, EngineConfig, SessionController};
use loopcast_ipc::{EngineCommand, EngineEvent};

/// Video argument that reads the source from stdin.
pub const STDIN_SOURCE: &str = "-";

pub struct StreamOptions {
    pub video: String,
    pub stream_key: String,
    pub json: bool,
}

/// What the readout loop does next.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Finish(bool),
}

/// Copy the video, stream it, and return whether the session ended well.
pub fn run_stream(config: EngineConfig, options: StreamOptions) -> Result<bool> {
    // Checked before the copy so a missing key fails fast.
    SessionController::validate_credential(&options.stream_key)?;

    let (command_tx, command_rx) = loopcast_ipc::command_channel();
    let (event_tx, event_rx) = loopcast_ipc::event_channel();

    let preloaded: Option<Arc<dyn SourceProvider>> = if options.video == STDIN_SOURCE {
        Some(Arc::new(OnceSource::new("stdin", std::io::stdin())))
    } else {
        None
    };
    let from_stdin = preloaded.is_some();

    let engine_thread = thread::Builder::new()
        .name("loopcast-engine".into())
        .spawn(move || {
            let mut engine = create_engine(command_rx, event_tx, config);
            if let Some(source) = preloaded {
                engine.acquire_from(source);
            }
            engine.run();
        })
        .context("Failed to spawn engine thread")?;

    if !from_stdin {
        command_tx
            .send(EngineCommand::Acquire {
                source: PathBuf::from(&options.video),
            })
            .map_err(|e| anyhow!("Failed to send command: {e}"))?;
    }

    let interrupts = spawn_interrupt_listener();
    let mut readout = Readout::new(
        command_tx.clone(),
        options.stream_key,
        options.json,
        Box::new(std::io::stdout()),
    );
    let result = readout.drive(&event_rx, interrupts);

    // Nobody reads events any more; dropping the receiver unblocks any
    // sender so the engine can wind down.
    drop(event_rx);
    let _ = command_tx.send(EngineCommand::Shutdown);
    drop(command_tx);
    if engine_thread.join().is_err() {
        bail!("Engine thread panicked");
    }

    result
}

/// Forward Ctrl-C presses into a channel.
fn spawn_interrupt_listener() -> Receiver<()> {
    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(4);

    let spawned = thread::Builder::new()
        .name("loopcast-signal".into())
        .spawn(move || listen_for_interrupts(interrupt_tx));
    if let Err(e) = spawned {
        warn!(error = %e, "Ctrl-C handling unavailable");
    }

    interrupt_rx
}

fn listen_for_interrupts(interrupt_tx: Sender<()>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "Failed to build signal runtime");
            return;
        }
    };

    runtime.block_on(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
            if interrupt_tx.send(()).is_err() {
                break;
            }
        }
    });
}

/// Turns engine events into terminal output and follow-up commands.
struct Readout {
    command_tx: Sender<EngineCommand>,
    out: Box<dyn Write>,
    stream_key: String,
    json: bool,
    session_requested: bool,
}

impl Readout {
    fn new(
        command_tx: Sender<EngineCommand>,
        stream_key: String,
        json: bool,
        out: Box<dyn Write>,
    ) -> Self {
        Self {
            command_tx,
            out,
            stream_key,
            json,
            session_requested: false,
        }
    }

    fn drive(&mut self, events: &Receiver<EngineEvent>, interrupts: Receiver<()>) -> Result<bool> {
        let mut interrupts = interrupts;

        loop {
            let mut listener_gone = false;

            select! {
                recv(events) -> event => {
                    let event = event.map_err(|_| anyhow!("Engine stopped unexpectedly"))?;
                    if let Flow::Finish(success) = self.handle_event(event)? {
                        return Ok(success);
                    }
                }
                recv(interrupts) -> interrupt => match interrupt {
                    Ok(()) => {
                        if let Flow::Finish(success) = self.interrupt()? {
                            return Ok(success);
                        }
                    }
                    Err(_) => listener_gone = true,
                }
            }

            if listener_gone {
                interrupts = crossbeam_channel::never();
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) -> Result<Flow> {
        if self.json {
            self.print_json(&event)?;
        }

        let flow = match event {
            EngineEvent::Ready => Flow::Continue,
            EngineEvent::AcquireStarted { source } => {
                self.status(&format!("Status: Copying {source}..."))?;
                Flow::Continue
            }
            EngineEvent::Acquired { bytes_copied, .. } => {
                self.status(&format!("Status: Ready to stream ({bytes_copied} bytes)"))?;
                self.send(EngineCommand::Start {
                    stream_key: self.stream_key.clone(),
                })?;
                self.session_requested = true;
                Flow::Continue
            }
            EngineEvent::AcquireFailed {
                bytes_copied,
                message,
            } => {
                self.status(&format!(
                    "Status: Error copying file ({message}, {bytes_copied} bytes copied)"
                ))?;
                Flow::Finish(false)
            }
            EngineEvent::StateChanged { current, .. } => {
                self.status(&current.status_message())?;
                Flow::Continue
            }
            EngineEvent::Progress { message } => {
                self.status(&message)?;
                Flow::Continue
            }
            EngineEvent::Metrics(metrics) => {
                debug!(?metrics, "Stream metrics");
                Flow::Continue
            }
            EngineEvent::PerformanceWarning(warning) => {
                warn!(?warning, "Stream is struggling");
                Flow::Continue
            }
            EngineEvent::Error {
                recoverable,
                message,
            } => {
                self.status(&format!("Status: {message}"))?;
                // A rejected start means no session will follow.
                if self.session_requested || !recoverable {
                    Flow::Finish(false)
                } else {
                    Flow::Continue
                }
            }
            EngineEvent::SessionEnded { success } => Flow::Finish(success),
            EngineEvent::Shutdown => Flow::Finish(false),
        };

        Ok(flow)
    }

    fn interrupt(&mut self) -> Result<Flow> {
        if self.session_requested {
            info!("Stopping stream");
            self.send(EngineCommand::Stop)?;
            Ok(Flow::Continue)
        } else {
            info!("Interrupted before streaming started");
            Ok(Flow::Finish(false))
        }
    }

    fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| anyhow!("Failed to send command: {e}"))
    }

    fn status(&mut self, line: &str) -> Result<()> {
        if !self.json {
            writeln!(self.out, "{line}").context("Failed to write status")?;
            self.out.flush().context("Failed to write status")?;
        }
        Ok(())
    }

    fn print_json(&mut self, event: &EngineEvent) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopcast_ipc::{SessionState, StopReason};

    fn readout() -> (Readout, Receiver<EngineCommand>) {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        (
            Readout::new(
                command_tx,
                "abc-123".into(),
                false,
                Box::new(std::io::sink()),
            ),
            command_rx,
        )
    }

    #[test]
    fn test_acquired_starts_session() {
        let (mut readout, commands) = readout();

        let flow = readout
            .handle_event(EngineEvent::Acquired {
                path: "/cache/stream_temp.mp4".into(),
                bytes_copied: 10_485_760,
            })
            .unwrap();

        assert_eq!(flow, Flow::Continue);
        match commands.try_recv().unwrap() {
            EngineCommand::Start { stream_key } => assert_eq!(stream_key, "abc-123"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_session_end_finishes_with_outcome() {
        let (mut readout, _commands) = readout();

        let completed = SessionState::Completed {
            reason: StopReason::EngineFinished,
        };
        assert_eq!(
            readout
                .handle_event(EngineEvent::StateChanged {
                    previous: Box::new(SessionState::Active),
                    current: Box::new(completed),
                })
                .unwrap(),
            Flow::Continue
        );
        assert_eq!(
            readout
                .handle_event(EngineEvent::SessionEnded { success: true })
                .unwrap(),
            Flow::Finish(true)
        );
    }

    #[test]
    fn test_failed_copy_finishes_unsuccessfully() {
        let (mut readout, commands) = readout();

        let flow = readout
            .handle_event(EngineEvent::AcquireFailed {
                bytes_copied: 3000,
                message: "I/O error".into(),
            })
            .unwrap();

        assert_eq!(flow, Flow::Finish(false));
        assert!(commands.try_recv().is_err());
    }

    #[test]
    fn test_rejected_start_finishes() {
        let (mut readout, _commands) = readout();
        readout.session_requested = true;

        let flow = readout
            .handle_event(EngineEvent::Error {
                recoverable: true,
                message: "Enter a stream key".into(),
            })
            .unwrap();

        assert_eq!(flow, Flow::Finish(false));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn test_closed_stdout_is_an_error() {
        for json in [false, true] {
            let (command_tx, _commands) = crossbeam_channel::unbounded();
            let mut readout =
                Readout::new(command_tx, "abc-123".into(), json, Box::new(ClosedPipe));

            let result = readout.handle_event(EngineEvent::Progress {
                message: "frame=1".into(),
            });

            assert!(result.is_err());
        }
    }

    #[test]
    fn test_missing_key_fails_before_copy() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, vec![0u8; 1024]).unwrap();
        let cache_path = dir.path().join("cache").join("stream_temp.mp4");
        let config = EngineConfig {
            cache_path: cache_path.clone(),
            ..Default::default()
        };

        let result = run_stream(
            config,
            StreamOptions {
                video: video.to_string_lossy().into_owned(),
                stream_key: "   ".into(),
                json: false,
            },
        );

        assert_eq!(result.unwrap_err().to_string(), "Enter a stream key");
        assert!(!cache_path.exists());
    }

    #[test]
    fn test_interrupt_stops_running_session() {
        let (mut readout, commands) = readout();

        assert_eq!(readout.interrupt().unwrap(), Flow::Finish(false));

        readout.session_requested = true;
        assert_eq!(readout.interrupt().unwrap(), Flow::Continue);
        assert!(matches!(commands.try_recv(), Ok(EngineCommand::Stop)));
    }
}
