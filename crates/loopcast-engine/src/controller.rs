//! Streaming session lifecycle.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use loopcast_acquire::AcquiredFile;
use loopcast_ipc::{SessionState, StopReason};
use loopcast_media::{
    build_stream_args, EncodeProfile, EngineControl, EngineOutput, IngestEndpoint, MediaEngine,
    ReturnCode,
};

use crate::error::SessionError;
use crate::observer::SessionObserver;
use crate::SessionResult;

/// Generic failure text; the engine's exit code does not tell a bad stream
/// key apart from a lost connection.
const FAILURE_MESSAGE: &str = "Stream failed or stopped. Check the stream key.";

/// Starts streaming sessions and enforces that only one runs at a time.
pub struct SessionController {
    engine: Arc<dyn MediaEngine>,
    endpoint: IngestEndpoint,
    profile: EncodeProfile,
    current: Option<CurrentSession>,
    next_id: u64,
}

struct CurrentSession {
    id: u64,
    state: Arc<RwLock<SessionState>>,
    control: Option<Arc<dyn EngineControl>>,
}

/// Handle to a started session.
pub struct SessionHandle {
    id: u64,
    state: Arc<RwLock<SessionState>>,
    control: Option<Arc<dyn EngineControl>>,
    monitor: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Create a controller publishing to `endpoint` with `profile`.
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        endpoint: IngestEndpoint,
        profile: EncodeProfile,
    ) -> Self {
        Self {
            engine,
            endpoint,
            profile,
            current: None,
            next_id: 1,
        }
    }

    /// Check a stream key and return it trimmed.
    pub fn validate_credential(credential: &str) -> SessionResult<&str> {
        let key = credential.trim();
        if key.is_empty() {
            return Err(SessionError::Validation("Enter a stream key".to_string()));
        }
        Ok(key)
    }

    /// Full publish URL for a stream key.
    pub fn ingest_url(&self, stream_key: &str) -> String {
        self.endpoint.url_for(stream_key)
    }

    /// Engine arguments a session for `input` and `stream_key` would use.
    pub fn stream_args(&self, input: &AcquiredFile, stream_key: &str) -> SessionResult<Vec<String>> {
        let args = build_stream_args(input.path(), &self.profile, &self.ingest_url(stream_key))?;
        Ok(args)
    }

    /// State of the most recent session, or `Idle` if none was started.
    pub fn state(&self) -> SessionState {
        self.current
            .as_ref()
            .map(|s| s.state.read().clone())
            .unwrap_or_default()
    }

    /// Whether a session is starting or streaming.
    pub fn is_in_flight(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.state.read().is_in_flight())
    }

    /// Start streaming `input` with `credential`.
    ///
    /// The credential is validated before anything else. A second call while
    /// a session is in flight is rejected without touching the engine. If
    /// the engine cannot be launched the session fails and `observer` still
    /// receives its terminal event.
    #[instrument(name = "start_session", skip_all, fields(input = %input.path().display()))]
    pub fn start_session(
        &mut self,
        input: &AcquiredFile,
        credential: &str,
        mut observer: Box<dyn SessionObserver>,
    ) -> SessionResult<SessionHandle> {
        let stream_key = Self::validate_credential(credential)?;

        if self.is_in_flight() {
            warn!("Session already in flight, rejecting start");
            return Err(SessionError::AlreadyActive);
        }

        let args = self.stream_args(input, stream_key)?;

        let id = self.next_id;
        self.next_id += 1;

        let state = Arc::new(RwLock::new(SessionState::Idle));
        transition(id, &state, observer.as_mut(), SessionState::Starting);

        info!(session = id, engine = self.engine.name(), "Starting session");

        let run = match self.engine.invoke(&args) {
            Ok(run) => run,
            Err(e) => {
                error!(session = id, error = %e, "Engine launch failed");
                transition(
                    id,
                    &state,
                    observer.as_mut(),
                    SessionState::Failed {
                        exit_code: None,
                        message: e.to_string(),
                    },
                );
                observer.terminal_event(false);
                self.current = Some(CurrentSession {
                    id,
                    state,
                    control: None,
                });
                return Err(SessionError::Launch(e));
            }
        };

        // The monitor takes the observer out of the slot when it starts. If
        // the thread never runs, the observer is still here to be told.
        let slot: ObserverSlot = Arc::new(Mutex::new(Some(observer)));
        let monitor = {
            let state = Arc::clone(&state);
            let slot = Arc::clone(&slot);
            let output = run.output;
            thread::Builder::new()
                .name(format!("loopcast-session-{id}"))
                .spawn(move || {
                    let observer = slot.lock().take();
                    if let Some(observer) = observer {
                        monitor_session(id, output, state, observer);
                    }
                })
        };
        let monitor = match monitor {
            Ok(handle) => handle,
            Err(e) => {
                error!(session = id, error = %e, "Failed to spawn session monitor");
                run.control.cancel();
                fail_unmonitored(
                    id,
                    &state,
                    &slot,
                    format!("Failed to monitor engine: {e}"),
                );
                self.current = Some(CurrentSession {
                    id,
                    state,
                    control: None,
                });
                return Err(SessionError::Launch(e.into()));
            }
        };

        self.current = Some(CurrentSession {
            id,
            state: Arc::clone(&state),
            control: Some(Arc::clone(&run.control)),
        });

        Ok(SessionHandle {
            id,
            state,
            control: Some(run.control),
            monitor: Some(monitor),
        })
    }

    /// Ask the running session to stop. Returns false if none is running.
    pub fn stop(&self) -> bool {
        match &self.current {
            Some(session) if session.state.read().is_in_flight() => {
                if let Some(control) = &session.control {
                    info!(session = session.id, "Stopping session");
                    control.cancel();
                    return true;
                }
                false
            }
            _ => false,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionHandle {
    /// Session identifier, unique per controller.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.read().clone()
    }

    /// Whether the session has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.read().is_terminal()
    }

    /// Ask the engine to stop.
    pub fn cancel(&self) {
        if let Some(control) = &self.control {
            control.cancel();
        }
    }

    /// Block until the session ends and return its final state.
    pub fn wait(mut self) -> SessionState {
        if let Some(monitor) = self.monitor.take() {
            if monitor.join().is_err() {
                error!(session = self.id, "Session monitor panicked");
            }
        }
        self.state()
    }
}

/// Hands the observer to the monitor thread.
type ObserverSlot = Arc<Mutex<Option<Box<dyn SessionObserver>>>>;

/// End a session whose monitor never ran. Does nothing if the monitor already
/// took the observer.
fn fail_unmonitored(id: u64, state: &RwLock<SessionState>, slot: &ObserverSlot, message: String) {
    let Some(mut observer) = slot.lock().take() else {
        return;
    };
    transition(
        id,
        state,
        observer.as_mut(),
        SessionState::Failed {
            exit_code: None,
            message,
        },
    );
    observer.terminal_event(false);
}

/// Apply a state transition and tell the observer about it.
fn transition(
    id: u64,
    state: &RwLock<SessionState>,
    observer: &mut dyn SessionObserver,
    next: SessionState,
) {
    let previous = {
        let mut current = state.write();
        if !current.can_transition_to(&next) {
            warn!(
                session = id,
                from = current.name(),
                to = next.name(),
                "Ignoring invalid state transition"
            );
            return;
        }
        std::mem::replace(&mut *current, next.clone())
    };

    debug!(
        session = id,
        previous = %previous.name(),
        current = %next.name(),
        "State transition"
    );
    observer.state_changed(&previous, &next);
}

/// Map an engine return code to the terminal state and its success flag.
fn classify(code: ReturnCode) -> (SessionState, bool) {
    if code.cancelled {
        (
            SessionState::Completed {
                reason: StopReason::UserRequested,
            },
            true,
        )
    } else if code.is_success() {
        (
            SessionState::Completed {
                reason: StopReason::EngineFinished,
            },
            true,
        )
    } else {
        (
            SessionState::Failed {
                exit_code: code.code,
                message: FAILURE_MESSAGE.to_string(),
            },
            false,
        )
    }
}

/// Forward engine output to the observer until the engine exits.
fn monitor_session(
    id: u64,
    output: Receiver<EngineOutput>,
    state: Arc<RwLock<SessionState>>,
    mut observer: Box<dyn SessionObserver>,
) {
    for item in output.iter() {
        match item {
            EngineOutput::Log(line) => {
                if state.read().is_starting() {
                    transition(id, &state, observer.as_mut(), SessionState::Active);
                }
                observer.progress_event(&line);
            }
            EngineOutput::Exited(code) => {
                let (terminal, success) = classify(code);
                info!(session = id, ?code, state = terminal.name(), "Session ended");
                transition(id, &state, observer.as_mut(), terminal);
                observer.terminal_event(success);
                return;
            }
        }
    }

    warn!(session = id, "Engine output closed without an exit status");
    transition(
        id,
        &state,
        observer.as_mut(),
        SessionState::Failed {
            exit_code: None,
            message: FAILURE_MESSAGE.to_string(),
        },
    );
    observer.terminal_event(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{acquired_file, RecordingObserver, Script, ScriptedEngine, Seen};
    use std::time::{Duration, Instant};

    fn controller(engine: Arc<ScriptedEngine>) -> SessionController {
        SessionController::new(engine, IngestEndpoint::default(), EncodeProfile::default())
    }

    fn wait_for_state(handle: &SessionHandle, wanted: fn(&SessionState) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !wanted(&handle.state()) {
            assert!(Instant::now() < deadline, "state never reached: {:?}", handle.state());
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_unmonitored_session_still_ends_once() {
        let observer = RecordingObserver::default();
        let state = RwLock::new(SessionState::Starting);
        let boxed: Box<dyn SessionObserver> = Box::new(observer.clone());
        let slot: ObserverSlot = Arc::new(Mutex::new(Some(boxed)));

        fail_unmonitored(7, &state, &slot, "no monitor".into());
        fail_unmonitored(7, &state, &slot, "no monitor".into());

        let failed = SessionState::Failed {
            exit_code: None,
            message: "no monitor".into(),
        };
        assert_eq!(*state.read(), failed);
        assert_eq!(
            observer.events(),
            vec![Seen::State(failed), Seen::Terminal(false)]
        );
    }

    #[test]
    fn test_unmonitored_after_monitor_took_observer_is_silent() {
        let observer = RecordingObserver::default();
        let state = RwLock::new(SessionState::Starting);
        let boxed: Box<dyn SessionObserver> = Box::new(observer.clone());
        let slot: ObserverSlot = Arc::new(Mutex::new(Some(boxed)));
        let taken = slot.lock().take();

        fail_unmonitored(8, &state, &slot, "no monitor".into());

        assert!(taken.is_some());
        assert_eq!(*state.read(), SessionState::Starting);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_empty_credential_never_invokes_engine() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 16);
        let engine = ScriptedEngine::new(Script::Finish {
            lines: vec![],
            code: 0,
        });
        let mut controller = controller(Arc::clone(&engine));

        for key in ["", "   ", "\t\n"] {
            let observer = RecordingObserver::default();
            let result = controller.start_session(&file, key, Box::new(observer.clone()));

            assert!(matches!(result, Err(SessionError::Validation(_))));
            assert!(observer.events().is_empty());
        }
        assert_eq!(engine.invocations(), 0);
        assert!(controller.state().is_idle());
    }

    #[test]
    fn test_ten_mebibyte_session_completes() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 10_485_760);
        assert_eq!(file.bytes_copied(), 10_485_760);

        let engine = ScriptedEngine::new(Script::Finish {
            lines: vec!["Input #0".into(), "frame=  1 fps=0.0 time=00:00:00.04 speed=1x".into()],
            code: 0,
        });
        let mut controller = controller(Arc::clone(&engine));
        let observer = RecordingObserver::default();

        let handle = controller
            .start_session(&file, "abc-123", Box::new(observer.clone()))
            .unwrap();
        let final_state = handle.wait();

        assert_eq!(
            final_state,
            SessionState::Completed {
                reason: StopReason::EngineFinished
            }
        );
        assert_eq!(
            observer.events(),
            vec![
                Seen::State(SessionState::Starting),
                Seen::State(SessionState::Active),
                Seen::Progress("Input #0".into()),
                Seen::Progress("frame=  1 fps=0.0 time=00:00:00.04 speed=1x".into()),
                Seen::State(final_state),
                Seen::Terminal(true),
            ]
        );
    }

    #[test]
    fn test_engine_failure_emits_single_failed_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 64);
        let engine = ScriptedEngine::new(Script::Finish {
            lines: vec!["Connection to tcp://a.rtmp.youtube.com:1935 failed".into()],
            code: 1,
        });
        let mut controller = controller(engine);
        let observer = RecordingObserver::default();

        let handle = controller
            .start_session(&file, "bad-key", Box::new(observer.clone()))
            .unwrap();
        let final_state = handle.wait();

        assert!(matches!(
            final_state,
            SessionState::Failed {
                exit_code: Some(1),
                ..
            }
        ));
        assert_eq!(observer.terminal_count(), 1);
        assert_eq!(observer.events().last(), Some(&Seen::Terminal(false)));
        assert!(!controller.is_in_flight());
    }

    #[test]
    fn test_ingest_url_is_prefix_plus_key() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 8);
        let engine = ScriptedEngine::new(Script::Finish {
            lines: vec![],
            code: 0,
        });
        let mut controller = controller(Arc::clone(&engine));

        controller
            .start_session(&file, "  abc-123 ", Box::new(RecordingObserver::default()))
            .unwrap()
            .wait();

        let args = engine.last_args().unwrap();
        assert_eq!(
            args.last().map(String::as_str),
            Some("rtmp://a.rtmp.youtube.com/live2/abc-123")
        );
        assert_eq!(args[4], file.path().to_str().unwrap());
    }

    #[test]
    fn test_second_start_while_active_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 32);
        let engine = ScriptedEngine::new(Script::RunUntilCancelled {
            lines: vec!["Output #0, flv".into()],
        });
        let mut controller = controller(Arc::clone(&engine));
        let first = RecordingObserver::default();

        let handle = controller
            .start_session(&file, "key", Box::new(first.clone()))
            .unwrap();
        wait_for_state(&handle, SessionState::is_active);

        let second = RecordingObserver::default();
        let result = controller.start_session(&file, "key", Box::new(second.clone()));
        assert!(matches!(result, Err(SessionError::AlreadyActive)));
        assert_eq!(engine.invocations(), 1);
        assert!(second.events().is_empty());

        assert!(controller.stop());
        assert_eq!(
            handle.wait(),
            SessionState::Completed {
                reason: StopReason::UserRequested
            }
        );
        assert_eq!(first.events().last(), Some(&Seen::Terminal(true)));
        assert!(!controller.stop());

        // Terminal sessions are final; a new one can be started.
        let handle = controller
            .start_session(&file, "key", Box::new(RecordingObserver::default()))
            .unwrap();
        assert_eq!(handle.id(), 2);
        handle.cancel();
        handle.wait();
        assert_eq!(engine.invocations(), 2);
    }

    #[test]
    fn test_launch_failure_fails_session() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 8);
        let mut controller = controller(ScriptedEngine::new(Script::FailToLaunch));
        let observer = RecordingObserver::default();

        let result = controller.start_session(&file, "key", Box::new(observer.clone()));

        assert!(matches!(result, Err(SessionError::Launch(_))));
        assert!(controller.state().is_failed());
        let events = observer.events();
        assert_eq!(events.first(), Some(&Seen::State(SessionState::Starting)));
        assert_eq!(events.last(), Some(&Seen::Terminal(false)));
        assert_eq!(observer.terminal_count(), 1);
    }

    #[test]
    fn test_exit_without_output_skips_active() {
        let dir = tempfile::tempdir().unwrap();
        let file = acquired_file(dir.path(), 8);
        let mut controller = controller(ScriptedEngine::new(Script::Finish {
            lines: vec![],
            code: 255,
        }));
        let observer = RecordingObserver::default();

        let state = controller
            .start_session(&file, "key", Box::new(observer.clone()))
            .unwrap()
            .wait();

        assert!(state.is_failed());
        assert!(!observer
            .events()
            .contains(&Seen::State(SessionState::Active)));
    }
}
