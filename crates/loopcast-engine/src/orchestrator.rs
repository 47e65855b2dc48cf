//! Main engine command loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use loopcast_acquire::{spawn_acquire, AcquireTask, AcquiredFile, FileSource, SourceProvider};
use loopcast_ipc::{EngineCommand, EngineEvent, SessionState};
use loopcast_media::MediaEngine;

use crate::config::EngineConfig;
use crate::controller::{SessionController, SessionHandle};
use crate::error::SessionError;
use crate::metrics::MetricsCollector;
use crate::observer::ChannelObserver;

/// How long the loop waits for a command before polling background work.
const TICK: Duration = Duration::from_millis(100);

/// The streaming engine.
///
/// Runs on its own thread and plays the part of the interactive context:
/// commands come in, background results are marshaled back here before any
/// state is touched, and events go out.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    config: EngineConfig,
    controller: SessionController,
    acquisition: Option<AcquireTask>,
    ready: Option<AcquiredFile>,
    session: Option<SessionHandle>,
    metrics: Arc<MetricsCollector>,
    last_metrics: Instant,
}

impl Engine {
    /// Create a new engine.
    pub fn new(
        command_rx: Receiver<EngineCommand>,
        event_tx: Sender<EngineEvent>,
        config: EngineConfig,
        media: Arc<dyn MediaEngine>,
    ) -> Self {
        let controller =
            SessionController::new(media, config.endpoint.clone(), config.profile.clone());
        let metrics = Arc::new(MetricsCollector::new(config.profile.video_bitrate_kbps));

        Self {
            command_rx,
            event_tx,
            config,
            controller,
            acquisition: None,
            ready: None,
            session: None,
            metrics,
            last_metrics: Instant::now(),
        }
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        loop {
            match self.command_rx.recv_timeout(TICK) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Command channel disconnected, shutting down");
                    self.shutdown_session();
                    break;
                }
            }

            self.poll_background();
        }

        info!("Engine stopped");
    }

    /// Copy a source that cannot be named by a path (e.g. stdin).
    pub fn acquire_from(&mut self, source: Arc<dyn SourceProvider>) {
        if self.controller.is_in_flight() {
            self.send_error(true, "Cannot replace the video while streaming".to_string());
            return;
        }
        if self.acquisition.is_some() {
            self.send_error(true, "A copy is already in progress".to_string());
            return;
        }

        // The previous copy is about to be overwritten.
        self.ready = None;

        let task = spawn_acquire(
            source,
            self.config.cache_path.clone(),
            self.config.acquire.clone(),
        );
        info!(source = task.source(), destination = %task.destination().display(), "Copying video");
        self.send_event(EngineEvent::AcquireStarted {
            source: task.source().to_string(),
        });
        self.acquisition = Some(task);
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Acquire { source } => {
                self.acquire_from(Arc::new(FileSource::new(source)));
            }
            EngineCommand::Start { stream_key } => self.start_session(&stream_key),
            EngineCommand::Stop => self.stop_session(),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.shutdown_session();
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "engine_start_session", skip_all)]
    fn start_session(&mut self, stream_key: &str) {
        if let Err(e) = SessionController::validate_credential(stream_key) {
            self.send_error(true, e.to_string());
            return;
        }

        let file = match (&self.acquisition, &self.ready) {
            (Some(_), _) => Err(SessionError::NotReady("still copying".to_string())),
            (None, Some(file)) => Ok(file.clone()),
            (None, None) => Err(SessionError::NotReady("select a video first".to_string())),
        };
        let file = match file {
            Ok(file) => file,
            Err(e) => {
                self.send_error(true, e.to_string());
                return;
            }
        };

        let metrics = Arc::new(MetricsCollector::new(
            self.config.profile.video_bitrate_kbps,
        ));
        let observer =
            ChannelObserver::new(self.event_tx.clone()).with_metrics(Arc::clone(&metrics));
        // Started before the session so the terminal event's stop always
        // comes after it.
        metrics.start();

        match self
            .controller
            .start_session(&file, stream_key, Box::new(observer))
        {
            Ok(handle) => {
                self.metrics = metrics;
                self.last_metrics = Instant::now();
                self.session = Some(handle);
            }
            Err(SessionError::Launch(e)) => {
                // The observer already reported the failed session.
                error!(error = %e, "Stream start failed");
            }
            Err(e) => {
                metrics.stop();
                self.send_error(true, e.to_string());
            }
        }
    }

    fn stop_session(&mut self) {
        match &self.session {
            Some(handle) if !handle.is_finished() => {
                info!(session = handle.id(), "Stop requested");
                handle.cancel();
            }
            _ => debug!("No running session, ignoring stop command"),
        }
    }

    /// Stop any running session and wait for it to end.
    fn shutdown_session(&mut self) {
        if let Some(handle) = self.session.take() {
            handle.cancel();
            let state = handle.wait();
            debug!(state = state.name(), "Session ended for shutdown");
        }
    }

    fn poll_background(&mut self) {
        self.poll_acquisition();
        self.poll_session();
    }

    fn poll_acquisition(&mut self) {
        let Some(task) = self.acquisition.as_mut() else {
            return;
        };
        let Some(result) = task.try_result() else {
            return;
        };
        self.acquisition = None;

        match result {
            Ok(file) => {
                info!(bytes = file.bytes_copied(), "Video ready");
                self.send_event(EngineEvent::Acquired {
                    path: file.path().to_path_buf(),
                    bytes_copied: file.bytes_copied(),
                });
                self.ready = Some(file);
            }
            Err(e) => {
                error!(error = %e, "Copy failed");
                self.send_event(EngineEvent::AcquireFailed {
                    bytes_copied: e.bytes_copied(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn poll_session(&mut self) {
        let state = match &self.session {
            Some(handle) => handle.state(),
            None => return,
        };

        if state.is_terminal() {
            if let Some(handle) = self.session.take() {
                handle.wait();
            }
            return;
        }

        if state.is_active() && self.last_metrics.elapsed() >= self.config.metrics_interval {
            self.emit_metrics();
        }
    }

    /// Metrics stop with the session's terminal event, so none follow it.
    fn emit_metrics(&mut self) {
        self.metrics.report_if_running(|snapshot, warnings| {
            self.send_event(EngineEvent::Metrics(snapshot));

            for warning in warnings {
                warn!(?warning, "Performance warning");
                self.send_event(EngineEvent::PerformanceWarning(warning));
            }
        });

        self.last_metrics = Instant::now();
    }

    fn send_state(&self) {
        let state: SessionState = self.controller.state();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn send_error(&self, recoverable: bool, message: String) {
        warn!(recoverable, %message, "Command rejected");
        self.send_event(EngineEvent::Error {
            recoverable,
            message,
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Some(handle) = &self.session {
            handle.cancel();
        }
    }
}
