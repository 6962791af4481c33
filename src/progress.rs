//! Progress reporting for crawl runs
//!
//! The reporter subscribes to the crawl lifecycle and writes one JSON object
//! per line (`start`, `p`, `err`, `done`) to stderr, for external callers
//! that drive the binary.

use serde::Serialize;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::error::Result;
use crate::events::{CrawlEvent, CrawlObserver, EventKind, Flow};
use crate::models::{RunSnapshot, RunSummary};

/// Crawl phase indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrawlPhase {
    /// Walking directories and reporting paths
    #[default]
    Walk,
    /// Walk finished, workers still processing queued paths
    Process,
    /// Run completed
    Done,
}

impl CrawlPhase {
    /// Get string representation of the phase
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlPhase::Walk => "walk",
            CrawlPhase::Process => "process",
            CrawlPhase::Done => "done",
        }
    }
}

/// Start message sent when a crawl begins
#[derive(Debug, Clone, Serialize)]
pub struct StartMessage {
    /// Message type identifier
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    /// Sequence number
    pub seq: u64,
    /// Timestamp in milliseconds since reporter creation
    pub ts: u64,
    /// Crawl root paths
    pub roots: Vec<String>,
}

impl StartMessage {
    pub fn new(seq: u64, ts: u64, roots: Vec<String>) -> Self {
        Self {
            msg_type: "start",
            seq,
            ts,
            roots,
        }
    }
}

/// Progress message sent during a crawl
#[derive(Debug, Clone, Serialize)]
pub struct ProgressMessage {
    /// Message type identifier ("p" for progress)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub phase: CrawlPhase,
    /// Paths found
    #[serde(rename = "n")]
    pub found: u64,
    /// Paths skipped by filters
    #[serde(rename = "s")]
    pub skipped: u64,
    /// Files crawled
    #[serde(rename = "f")]
    pub files: u64,
    /// Directories crawled
    #[serde(rename = "d")]
    pub dirs: u64,
    /// Bytes of crawled files
    #[serde(rename = "b")]
    pub bytes: u64,
    /// Elapsed time in milliseconds
    pub ms: u64,
}

impl ProgressMessage {
    pub fn new(seq: u64, ts: u64, phase: CrawlPhase, run: &RunSnapshot, ms: u64) -> Self {
        Self {
            msg_type: "p",
            seq,
            ts,
            phase,
            found: run.paths_found,
            skipped: run.paths_skipped,
            files: run.files_crawled,
            dirs: run.directories_crawled,
            bytes: run.bytes_processed,
            ms,
        }
    }
}

/// Error message sent when a path cannot be crawled
#[derive(Debug, Clone, Serialize)]
pub struct ErrorProgressMessage {
    /// Message type identifier ("err" for error)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    pub message: String,
    /// Path that caused the error (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ErrorProgressMessage {
    pub fn new(seq: u64, ts: u64, message: String, path: Option<String>) -> Self {
        Self {
            msg_type: "err",
            seq,
            ts,
            message,
            path,
        }
    }
}

/// Done message sent once walking and processing have both finished
#[derive(Debug, Clone, Serialize)]
pub struct DoneMessage {
    /// Message type identifier ("done" for completion)
    #[serde(rename = "_t")]
    pub msg_type: &'static str,
    pub seq: u64,
    pub ts: u64,
    /// Whether the run ended via stop
    pub stopped: bool,
    /// Total number of files crawled
    #[serde(rename = "tf")]
    pub total_files: u64,
    /// Total number of directories crawled
    #[serde(rename = "td")]
    pub total_dirs: u64,
    /// Paths skipped by filters
    #[serde(rename = "sk")]
    pub skipped: u64,
    /// Paths written to the repository
    #[serde(rename = "pp")]
    pub persisted: u64,
    /// Empty directories found
    #[serde(rename = "ed")]
    pub empty_dirs: usize,
    /// Number of errors encountered
    #[serde(rename = "ec")]
    pub error_count: u64,
    /// Total duration in milliseconds
    pub ms: u64,
}

impl DoneMessage {
    pub fn new(seq: u64, ts: u64, summary: &RunSummary) -> Self {
        Self {
            msg_type: "done",
            seq,
            ts,
            stopped: summary.stopped,
            total_files: summary.walk.files_crawled,
            total_dirs: summary.walk.directories_crawled,
            skipped: summary.walk.paths_skipped,
            persisted: summary.paths_persisted,
            empty_dirs: summary.empty_directories,
            error_count: summary.error_count(),
            ms: summary.walk.duration_ms().unwrap_or(0),
        }
    }
}

/// Progress reporter writing JSON lines to stderr
pub struct ProgressReporter {
    /// Whether progress reporting is enabled
    enabled: bool,
    /// Minimum interval between progress messages in milliseconds
    interval_ms: u64,
    last_report: Mutex<Instant>,
    /// Sequence number for messages
    seq: AtomicU64,
    start_time: Instant,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ProgressReporter {
    /// Create a reporter writing to stderr
    pub fn new(enabled: bool, interval_ms: u64) -> Self {
        Self::with_sink(enabled, interval_ms, Box::new(std::io::stderr()))
    }

    /// Create a reporter writing to an arbitrary sink
    pub fn with_sink(enabled: bool, interval_ms: u64, sink: Box<dyn Write + Send>) -> Self {
        let now = Instant::now();
        Self {
            enabled,
            interval_ms,
            last_report: Mutex::new(now),
            seq: AtomicU64::new(0),
            start_time: now,
            sink: Mutex::new(sink),
        }
    }

    /// Check if the reporter is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the interval has elapsed since the last progress message
    pub fn should_report(&self) -> bool {
        if !self.enabled {
            return false;
        }
        self.last_report
            .lock()
            .map(|last| last.elapsed().as_millis() as u64 >= self.interval_ms)
            .unwrap_or(false)
    }

    /// Get the next sequence number (monotonically increasing)
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Get the current timestamp in milliseconds since reporter creation
    pub fn current_timestamp(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    fn output<T: Serialize>(&self, msg: &T) {
        let Ok(json) = serde_json::to_string(msg) else {
            return;
        };
        if let Ok(mut sink) = self.sink.lock() {
            writeln!(sink, "{}", json).ok();
            sink.flush().ok();
        }
    }

    fn report_progress(&self, phase: CrawlPhase, run: &RunSnapshot, force: bool) -> bool {
        if !self.enabled || !(force || self.should_report()) {
            return false;
        }
        let msg = ProgressMessage::new(
            self.next_seq(),
            self.current_timestamp(),
            phase,
            run,
            self.current_timestamp(),
        );
        self.output(&msg);
        if let Ok(mut last) = self.last_report.lock() {
            *last = Instant::now();
        }
        true
    }

    /// Report run completion: a last `done` phase progress line, then the summary
    pub fn report_done(&self, summary: &RunSummary) {
        if !self.enabled {
            return;
        }
        self.report_progress(CrawlPhase::Done, &summary.walk, true);
        let msg = DoneMessage::new(self.next_seq(), self.current_timestamp(), summary);
        self.output(&msg);
    }
}

impl CrawlObserver for ProgressReporter {
    fn name(&self) -> &str {
        "progress"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow> {
        if !self.enabled {
            return Ok(Flow::Continue);
        }
        match &event.kind {
            EventKind::CrawlStarting { roots } => {
                let roots = roots
                    .iter()
                    .map(|p| p.to_string_lossy().to_string())
                    .collect();
                self.output(&StartMessage::new(
                    self.next_seq(),
                    self.current_timestamp(),
                    roots,
                ));
            }
            EventKind::CrawlProgress => {
                self.report_progress(CrawlPhase::Walk, &event.run, false);
            }
            EventKind::CrawlError { path, message } => {
                self.output(&ErrorProgressMessage::new(
                    self.next_seq(),
                    self.current_timestamp(),
                    message.clone(),
                    path.as_ref().map(|p| p.to_string_lossy().to_string()),
                ));
            }
            EventKind::CrawlStopped | EventKind::CrawlCompleted => {
                self.report_progress(CrawlPhase::Process, &event.run, true);
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Cloneable in-memory sink
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<serde_json::Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn event(kind: EventKind, run: RunSnapshot) -> CrawlEvent {
        CrawlEvent::new(kind, run)
    }

    #[test]
    fn test_crawl_phase_serialization() {
        assert_eq!(serde_json::to_string(&CrawlPhase::Walk).unwrap(), "\"walk\"");
        assert_eq!(CrawlPhase::Process.as_str(), "process");
        assert_eq!(CrawlPhase::Done.as_str(), "done");
    }

    #[test]
    fn test_walk_counters_use_short_keys() {
        let run = RunSnapshot {
            paths_found: 100,
            paths_skipped: 4,
            files_crawled: 80,
            directories_crawled: 16,
            bytes_processed: 4096,
            ..Default::default()
        };
        let msg = ProgressMessage::new(2, 200, CrawlPhase::Walk, &run, 1500);
        let parsed = serde_json::to_value(&msg).unwrap();

        assert_eq!(parsed["_t"], "p");
        assert_eq!(parsed["seq"], 2);
        assert_eq!(parsed["phase"], "walk");
        assert_eq!(parsed["n"], 100);
        assert_eq!(parsed["s"], 4);
        assert_eq!(parsed["f"], 80);
        assert_eq!(parsed["d"], 16);
        assert_eq!(parsed["b"], 4096);
        assert_eq!(parsed["ms"], 1500);
    }

    #[test]
    fn test_error_omits_missing_path() {
        let msg = ErrorProgressMessage::new(1, 100, "General IO error".to_string(), None);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("\"path\""));
    }

    #[test]
    fn test_done_carries_summary_totals() {
        let summary = RunSummary {
            stopped: true,
            walk: RunSnapshot {
                files_crawled: 10,
                directories_crawled: 2,
                errors: 1,
                ..Default::default()
            },
            paths_persisted: 12,
            processor_errors: 2,
            empty_directories: 1,
            ..Default::default()
        };
        let parsed = serde_json::to_value(DoneMessage::new(10, 5000, &summary)).unwrap();

        assert_eq!(parsed["_t"], "done");
        assert_eq!(parsed["stopped"], true);
        assert_eq!(parsed["tf"], 10);
        assert_eq!(parsed["td"], 2);
        assert_eq!(parsed["pp"], 12);
        assert_eq!(parsed["ed"], 1);
        assert_eq!(parsed["ec"], 3);
    }

    #[test]
    fn test_sequence_increases_per_message() {
        let reporter = ProgressReporter::new(true, 200);
        assert_eq!(reporter.next_seq(), 0);
        assert_eq!(reporter.next_seq(), 1);
        assert_eq!(reporter.next_seq(), 2);
    }

    #[test]
    fn test_interval_gates_reports() {
        let reporter = ProgressReporter::new(true, 10);
        assert!(!reporter.should_report());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(reporter.should_report());

        let disabled = ProgressReporter::new(false, 0);
        assert!(!disabled.should_report());
    }

    #[test]
    fn test_reporter_writes_json_lines() {
        let buffer = SharedBuffer::default();
        let reporter = ProgressReporter::with_sink(true, 0, Box::new(buffer.clone()));

        reporter
            .on_event(&event(
                EventKind::CrawlStarting {
                    roots: vec![PathBuf::from("/data")],
                },
                RunSnapshot::default(),
            ))
            .unwrap();
        reporter
            .on_event(&event(EventKind::CrawlProgress, RunSnapshot::default()))
            .unwrap();
        reporter
            .on_event(&event(
                EventKind::CrawlError {
                    path: Some(PathBuf::from("/data/x")),
                    message: "denied".into(),
                },
                RunSnapshot::default(),
            ))
            .unwrap();
        reporter
            .on_event(&event(EventKind::CrawlCompleted, RunSnapshot::default()))
            .unwrap();
        reporter.report_done(&RunSummary::default());

        let lines = buffer.lines();
        let types: Vec<&str> = lines.iter().map(|l| l["_t"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["start", "p", "err", "p", "p", "done"]);
        assert_eq!(lines[0]["roots"][0], "/data");
        assert_eq!(lines[3]["phase"], "process");
        assert_eq!(lines[4]["phase"], "done");
        let seqs: Vec<u64> = lines.iter().map(|l| l["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_disabled_reporter_is_silent() {
        let buffer = SharedBuffer::default();
        let reporter = ProgressReporter::with_sink(false, 0, Box::new(buffer.clone()));
        reporter
            .on_event(&event(EventKind::CrawlCompleted, RunSnapshot::default()))
            .unwrap();
        reporter.report_done(&RunSummary::default());
        assert!(buffer.lines().is_empty());
        assert_eq!(reporter.next_seq(), 0);
    }
}
