//! Metrics collection and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use loopcast_ipc::{StreamMetrics, WarningType};

/// Speed below which the stream cannot keep up with real time.
const FALLING_BEHIND_SPEED: f32 = 0.9;

/// How long without a progress line before the engine counts as stalled.
const STALL_THRESHOLD: Duration = Duration::from_secs(10);

/// One parsed ffmpeg progress line, e.g.
/// `frame=  123 fps= 30 q=28.0 size=  1024kB time=00:00:04.10 bitrate=2046.2kbits/s speed=1.01x`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub frames: u64,
    pub fps: f32,
    pub bitrate_kbps: f32,
    pub speed: f32,
    pub media_time_seconds: f64,
}

impl ProgressSample {
    /// Parse a progress line. Returns `None` for ordinary log lines.
    pub fn parse(line: &str) -> Option<Self> {
        let time = field(line, "time")?;

        Some(Self {
            frames: field(line, "frame")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            fps: field(line, "fps").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            bitrate_kbps: field(line, "bitrate")
                .and_then(|v| v.strip_suffix("kbits/s"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            speed: field(line, "speed")
                .and_then(|v| v.strip_suffix('x'))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            media_time_seconds: parse_timestamp(time).unwrap_or(0.0),
        })
    }
}

/// Value of `key=value` in a progress line. ffmpeg pads values with spaces
/// after the `=`.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let pattern = format!("{key}=");
    let mut search_from = 0;

    while let Some(found) = line[search_from..].find(&pattern) {
        let start = search_from + found;
        let at_word_start = line[..start]
            .chars()
            .next_back()
            .map_or(true, char::is_whitespace);

        if at_word_start {
            let rest = line[start + pattern.len()..].trim_start();
            let value = rest.split_whitespace().next()?;
            return Some(value);
        }
        search_from = start + pattern.len();
    }

    None
}

/// Parse `HH:MM:SS.ff` into seconds. ffmpeg prints a leading `-` for
/// negative times at startup.
fn parse_timestamp(value: &str) -> Option<f64> {
    let (sign, value) = match value.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, value),
    };

    let mut parts = value.splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if [hours, minutes, seconds].iter().any(|v| v.is_sign_negative()) {
        return None;
    }
    Some(sign * (hours * 3600.0 + minutes * 60.0 + seconds))
}

/// Collects and reports session metrics.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    log_lines: AtomicU64,
    last_sample: RwLock<Option<ProgressSample>>,
    last_progress_time: RwLock<Option<Instant>>,
    target_bitrate_kbps: u32,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new(target_bitrate_kbps: u32) -> Self {
        Self {
            start_time: RwLock::new(None),
            log_lines: AtomicU64::new(0),
            last_sample: RwLock::new(None),
            last_progress_time: RwLock::new(None),
            target_bitrate_kbps,
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        let now = Instant::now();
        *self.start_time.write() = Some(now);
        *self.last_progress_time.write() = Some(now);
    }

    /// Stop metrics collection. The last sample is kept.
    pub fn stop(&self) {
        *self.start_time.write() = None;
        *self.last_progress_time.write() = None;
    }

    /// Record one engine log line.
    pub fn record_line(&self, line: &str) {
        self.log_lines.fetch_add(1, Ordering::Relaxed);

        if let Some(sample) = ProgressSample::parse(line) {
            *self.last_sample.write() = Some(sample);
            if self.start_time.read().is_some() {
                *self.last_progress_time.write() = Some(Instant::now());
            }
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> StreamMetrics {
        let start_time = *self.start_time.read();
        self.snapshot_since(start_time)
    }

    /// Hand a snapshot and the current warnings to `report`, but only while
    /// collection is running. `stop` waits for a report in progress, so
    /// nothing is reported after `stop` returns.
    pub fn report_if_running(&self, report: impl FnOnce(StreamMetrics, Vec<WarningType>)) -> bool {
        let start_time = self.start_time.read();
        if start_time.is_none() {
            return false;
        }

        report(self.snapshot_since(*start_time), self.check_warnings());
        true
    }

    fn snapshot_since(&self, start_time: Option<Instant>) -> StreamMetrics {
        let sample = self.last_sample.read().clone().unwrap_or_default();
        let uptime_seconds = start_time.map(|s| s.elapsed().as_secs()).unwrap_or(0);

        StreamMetrics {
            frames: sample.frames,
            fps: sample.fps,
            bitrate_kbps: sample.bitrate_kbps,
            target_bitrate_kbps: self.target_bitrate_kbps,
            speed: sample.speed,
            media_time_seconds: sample.media_time_seconds,
            log_lines: self.log_lines.load(Ordering::Relaxed),
            uptime_seconds,
        }
    }

    /// Check for warnings based on current metrics.
    pub fn check_warnings(&self) -> Vec<WarningType> {
        let mut warnings = Vec::new();

        if let Some(sample) = self.last_sample.read().as_ref() {
            if sample.speed > 0.0 && sample.speed < FALLING_BEHIND_SPEED {
                warnings.push(WarningType::FallingBehind {
                    speed: sample.speed,
                });
            }
        }

        if let Some(last) = *self.last_progress_time.read() {
            let idle = last.elapsed();
            if idle >= STALL_THRESHOLD {
                debug!(?idle, "No engine progress");
                warnings.push(WarningType::Stalled {
                    idle_seconds: idle.as_secs(),
                });
            }
        }

        warnings
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(3000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "frame=  123 fps= 30 q=28.0 size=    1024kB time=00:01:04.10 bitrate=2046.2kbits/s speed=1.01x";

    #[test]
    fn test_parse_progress_line() {
        let sample = ProgressSample::parse(LINE).unwrap();

        assert_eq!(sample.frames, 123);
        assert_eq!(sample.fps, 30.0);
        assert_eq!(sample.bitrate_kbps, 2046.2);
        assert_eq!(sample.speed, 1.01);
        assert!((sample.media_time_seconds - 64.1).abs() < 1e-9);
    }

    #[test]
    fn test_parse_ignores_plain_log_lines() {
        assert_eq!(ProgressSample::parse("Input #0, mov,mp4, from 'x.mp4':"), None);
        assert_eq!(ProgressSample::parse("  Duration: 00:00:10.00, start: 0.0"), None);
    }

    #[test]
    fn test_parse_handles_na_values() {
        let sample =
            ProgressSample::parse("size=N/A time=00:00:01.00 bitrate=N/A speed=N/A").unwrap();

        assert_eq!(sample.frames, 0);
        assert_eq!(sample.bitrate_kbps, 0.0);
        assert_eq!(sample.speed, 0.0);
        assert_eq!(sample.media_time_seconds, 1.0);
    }

    #[test]
    fn test_field_requires_word_boundary() {
        assert_eq!(field("out_time=5 time=7", "time"), Some("7"));
        assert_eq!(field("out_time=5", "time"), None);
    }

    #[test]
    fn test_negative_timestamp_keeps_sign() {
        assert_eq!(parse_timestamp("-00:00:00.02"), Some(-0.02));
        assert_eq!(parse_timestamp("00:00:00.02"), Some(0.02));
        assert_eq!(parse_timestamp("--00:00:01.00"), None);

        let sample = ProgressSample::parse("frame=0 fps=0.0 time=-00:00:00.02 bitrate=N/A speed=N/A")
            .unwrap();
        assert!(sample.media_time_seconds < 0.0);
    }

    #[test]
    fn test_report_only_while_running() {
        let metrics = MetricsCollector::default();
        metrics.record_line(LINE);
        assert!(!metrics.report_if_running(|_, _| panic!("reported before start")));

        metrics.start();
        let mut reported = None;
        assert!(metrics.report_if_running(|snapshot, warnings| {
            reported = Some((snapshot.frames, warnings.len()));
        }));
        assert_eq!(reported, Some((123, 0)));

        metrics.stop();
        assert!(!metrics.report_if_running(|_, _| panic!("reported after stop")));
    }

    #[test]
    fn test_stop_waits_for_report_in_progress() {
        use std::sync::Arc;

        let metrics = Arc::new(MetricsCollector::default());
        metrics.start();
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);

        let reporter = {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                metrics.report_if_running(|_, _| {
                    entered_tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(100));
                })
            })
        };

        entered_rx.recv().unwrap();
        let before_stop = Instant::now();
        metrics.stop();

        assert!(before_stop.elapsed() >= Duration::from_millis(50));
        assert!(reporter.join().unwrap());
    }

    #[test]
    fn test_snapshot_and_line_count() {
        let metrics = MetricsCollector::new(3000);
        metrics.start();
        metrics.record_line("Stream mapping:");
        metrics.record_line(LINE);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.log_lines, 2);
        assert_eq!(snapshot.frames, 123);
        assert_eq!(snapshot.target_bitrate_kbps, 3000);
    }

    #[test]
    fn test_falling_behind_warning() {
        let metrics = MetricsCollector::default();
        metrics.start();
        metrics.record_line("frame=10 fps=12 time=00:00:00.40 bitrate=900.0kbits/s speed=0.48x");

        assert_eq!(
            metrics.check_warnings(),
            vec![WarningType::FallingBehind { speed: 0.48 }]
        );
    }

    #[test]
    fn test_no_warnings_when_healthy() {
        let metrics = MetricsCollector::default();
        metrics.start();
        metrics.record_line(LINE);

        assert!(metrics.check_warnings().is_empty());
    }
}
