//! Scripted media engines and recording observers for tests.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use loopcast_acquire::{acquire, AcquiredFile, OnceSource};
use loopcast_ipc::SessionState;
use loopcast_media::{
    EngineControl, EngineOutput, EngineRun, MediaEngine, MediaError, MediaResult, ReturnCode,
};

use crate::observer::SessionObserver;

/// What a scripted engine does when invoked.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// Print the lines, then exit with the code.
    Finish { lines: Vec<String>, code: i32 },

    /// Print the lines, then run until cancelled.
    RunUntilCancelled { lines: Vec<String> },

    /// Fail to launch.
    FailToLaunch,
}

pub(crate) struct ScriptedEngine {
    script: Script,
    invocations: AtomicUsize,
    last_args: Mutex<Option<Vec<String>>>,
}

impl ScriptedEngine {
    pub(crate) fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            invocations: AtomicUsize::new(0),
            last_args: Mutex::new(None),
        })
    }

    pub(crate) fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    pub(crate) fn last_args(&self) -> Option<Vec<String>> {
        self.last_args.lock().clone()
    }
}

struct ScriptedControl {
    cancel_tx: Sender<()>,
}

impl EngineControl for ScriptedControl {
    fn cancel(&self) {
        let _ = self.cancel_tx.try_send(());
    }
}

impl MediaEngine for ScriptedEngine {
    fn invoke(&self, args: &[String]) -> MediaResult<EngineRun> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock() = Some(args.to_vec());

        let (output_tx, output_rx) = crossbeam_channel::unbounded();
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded(1);

        let script = self.script.clone();
        match script {
            Script::FailToLaunch => {
                return Err(MediaError::Spawn {
                    program: "scripted".into(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
                })
            }
            Script::Finish { lines, code } => {
                thread::spawn(move || {
                    for line in lines {
                        let _ = output_tx.send(EngineOutput::Log(line));
                    }
                    let _ = output_tx.send(EngineOutput::Exited(ReturnCode::exited(code)));
                });
            }
            Script::RunUntilCancelled { lines } => {
                thread::spawn(move || {
                    for line in lines {
                        let _ = output_tx.send(EngineOutput::Log(line));
                    }
                    let _ = cancel_rx.recv();
                    let _ = output_tx.send(EngineOutput::Exited(ReturnCode::cancelled(None)));
                });
            }
        }

        Ok(EngineRun {
            output: output_rx,
            control: Arc::new(ScriptedControl { cancel_tx }),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Everything an observer saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Seen {
    State(SessionState),
    Progress(String),
    Terminal(bool),
}

#[derive(Clone, Default)]
pub(crate) struct RecordingObserver {
    pub(crate) seen: Arc<Mutex<Vec<Seen>>>,
}

impl RecordingObserver {
    pub(crate) fn events(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|s| matches!(s, Seen::Terminal(_)))
            .count()
    }
}

impl SessionObserver for RecordingObserver {
    fn progress_event(&mut self, message: &str) {
        self.seen.lock().push(Seen::Progress(message.to_string()));
    }

    fn terminal_event(&mut self, success: bool) {
        self.seen.lock().push(Seen::Terminal(success));
    }

    fn state_changed(&mut self, _previous: &SessionState, current: &SessionState) {
        self.seen.lock().push(Seen::State(current.clone()));
    }
}

/// Acquire `len` bytes into `dir` the same way the engine would.
pub(crate) fn acquired_file(dir: &Path, len: usize) -> AcquiredFile {
    let data: Vec<u8> = (0..len).map(|i| (i % 199) as u8).collect();
    let source = OnceSource::new("fixture", Cursor::new(data));
    acquire(&source, &dir.join("stream_temp.mp4"), 64 * 1024).unwrap()
}
