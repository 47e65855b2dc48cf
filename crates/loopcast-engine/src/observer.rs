//! Session observers.

use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::warn;

use loopcast_ipc::{EngineEvent, SessionState};

use crate::metrics::MetricsCollector;

/// Receives the events of one streaming session.
///
/// Calls arrive from the session's monitor thread in engine order.
/// `terminal_event` is called exactly once and is always the last call.
pub trait SessionObserver: Send {
    /// One log line from the media engine.
    fn progress_event(&mut self, message: &str);

    /// The session ended.
    fn terminal_event(&mut self, success: bool);

    /// The session moved to a new state.
    fn state_changed(&mut self, _previous: &SessionState, _current: &SessionState) {}
}

/// Forwards session events onto the engine event channel.
pub struct ChannelObserver {
    event_tx: Sender<EngineEvent>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ChannelObserver {
    pub fn new(event_tx: Sender<EngineEvent>) -> Self {
        Self {
            event_tx,
            metrics: None,
        }
    }

    /// Also feed every log line into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl SessionObserver for ChannelObserver {
    fn progress_event(&mut self, message: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_line(message);
        }

        // Runs on the monitor thread, so waiting for a slow reader is fine.
        let event = EngineEvent::Progress {
            message: message.to_string(),
        };
        if self.event_tx.send(event).is_err() {
            warn!("Event channel closed, dropping progress event");
        }
    }

    fn terminal_event(&mut self, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.stop();
        }

        if self
            .event_tx
            .send(EngineEvent::SessionEnded { success })
            .is_err()
        {
            warn!("Event channel closed before session end was delivered");
        }
    }

    fn state_changed(&mut self, previous: &SessionState, current: &SessionState) {
        let event = EngineEvent::StateChanged {
            previous: Box::new(previous.clone()),
            current: Box::new(current.clone()),
        };
        if self.event_tx.send(event).is_err() {
            warn!("Event channel closed before state change was delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_observer_forwards_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let metrics = Arc::new(MetricsCollector::new(3000));
        metrics.start();
        let mut observer = ChannelObserver::new(tx).with_metrics(Arc::clone(&metrics));

        observer.state_changed(&SessionState::Starting, &SessionState::Active);
        observer.progress_event("frame=  10 fps=25 q=28.0 size=  100kB time=00:00:00.40 bitrate=2000.0kbits/s speed=1.0x");
        observer.terminal_event(true);

        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], EngineEvent::StateChanged { .. }));
        assert!(matches!(events[1], EngineEvent::Progress { .. }));
        assert!(matches!(events[2], EngineEvent::SessionEnded { success: true }));
        assert_eq!(metrics.snapshot().frames, 10);
    }

    #[test]
    fn test_slow_reader_receives_every_line() {
        let (tx, rx) = loopcast_ipc::event_channel();
        let lines = 4 * loopcast_ipc::EVENT_CHANNEL_CAPACITY;

        let writer = std::thread::spawn(move || {
            let mut observer = ChannelObserver::new(tx);
            for i in 0..lines {
                observer.progress_event(&format!("line {i}"));
            }
            observer.terminal_event(true);
        });

        std::thread::sleep(std::time::Duration::from_millis(200));

        let mut received = Vec::new();
        for event in rx.iter() {
            match event {
                EngineEvent::Progress { message } => received.push(message),
                EngineEvent::SessionEnded { .. } => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        writer.join().unwrap();

        assert_eq!(received.len(), lines);
        assert_eq!(received[0], "line 0");
        assert_eq!(received[lines - 1], format!("line {}", lines - 1));
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        let mut observer = ChannelObserver::new(tx);

        observer.progress_event("line");
        observer.terminal_event(false);
    }
}
