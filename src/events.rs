//! Crawl lifecycle events and the observer bus
//!
//! The walker and the worker pool are the only producers. Every event is
//! fanned out to all subscribed observers; a failing observer is logged and
//! does not prevent delivery to the others. Stop requests are collected
//! during the fan-out and combined once it completes.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{PathEntry, RunSnapshot};

/// The lifecycle moment an event describes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    CrawlStarting {
        roots: Vec<PathBuf>,
    },
    PathFound {
        entry: PathEntry,
    },
    PathSkipped {
        entry: PathEntry,
        /// Name of the filter that denied the path
        filter: &'static str,
    },
    FileFound {
        entry: PathEntry,
    },
    FileCrawled {
        entry: PathEntry,
    },
    DirectoryFound {
        entry: PathEntry,
    },
    DirectoryCrawled {
        entry: PathEntry,
        /// Names of the immediate non-directory children
        file_names: Vec<String>,
    },
    CrawlProgress,
    CrawlError {
        path: Option<PathBuf>,
        message: String,
    },
    CrawlStopped,
    CrawlCompleted,
}

/// A typed lifecycle notification
#[derive(Debug, Clone, Serialize)]
pub struct CrawlEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    /// Counters of the producing run at the time of emission
    pub run: RunSnapshot,
    /// Set once any observer asked the producer to stop
    pub should_stop: bool,
}

impl CrawlEvent {
    pub fn new(kind: EventKind, run: RunSnapshot) -> Self {
        Self {
            kind,
            run,
            should_stop: false,
        }
    }

    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::CrawlStarting { .. } => "crawl_starting",
            EventKind::PathFound { .. } => "path_found",
            EventKind::PathSkipped { .. } => "path_skipped",
            EventKind::FileFound { .. } => "file_found",
            EventKind::FileCrawled { .. } => "file_crawled",
            EventKind::DirectoryFound { .. } => "directory_found",
            EventKind::DirectoryCrawled { .. } => "directory_crawled",
            EventKind::CrawlProgress => "crawl_progress",
            EventKind::CrawlError { .. } => "crawl_error",
            EventKind::CrawlStopped => "crawl_stopped",
            EventKind::CrawlCompleted => "crawl_completed",
        }
    }

    /// The path entry carried by path-bearing events
    pub fn entry(&self) -> Option<&PathEntry> {
        match &self.kind {
            EventKind::PathFound { entry }
            | EventKind::PathSkipped { entry, .. }
            | EventKind::FileFound { entry }
            | EventKind::FileCrawled { entry }
            | EventKind::DirectoryFound { entry }
            | EventKind::DirectoryCrawled { entry, .. } => Some(entry),
            _ => None,
        }
    }

    /// File or directory fully crawled, ready for processing
    pub fn is_crawled(&self) -> bool {
        matches!(
            self.kind,
            EventKind::FileCrawled { .. } | EventKind::DirectoryCrawled { .. }
        )
    }

    /// The producer finished, normally or via stop
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::CrawlStopped | EventKind::CrawlCompleted)
    }
}

/// What an observer wants the producer to do after a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Continue,
    Stop,
}

/// Subscriber to the crawl lifecycle
pub trait CrawlObserver: Send + Sync {
    /// Name used when logging observer failures
    fn name(&self) -> &str {
        "observer"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow>;
}

/// Fan-out of events to every subscribed observer
#[derive(Default, Clone)]
pub struct EventBus {
    observers: Vec<Arc<dyn CrawlObserver>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe an observer; subscribing the same instance twice is a no-op
    pub fn subscribe(&mut self, observer: Arc<dyn CrawlObserver>) -> bool {
        if self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Deliver the event to every observer, then combine their stop requests
    pub fn publish(&self, event: &mut CrawlEvent) -> Flow {
        let mut stop = false;
        for observer in &self.observers {
            match observer.on_event(event) {
                Ok(Flow::Stop) => {
                    log::info!(
                        "Observer '{}' requested stop on {}",
                        observer.name(),
                        event.name()
                    );
                    stop = true;
                }
                Ok(Flow::Continue) => {}
                Err(e) => {
                    log::error!(
                        "Unable to notify observer '{}' for {} event: {}",
                        observer.name(),
                        event.name(),
                        e
                    );
                }
            }
        }
        if stop {
            event.should_stop = true;
            Flow::Stop
        } else {
            Flow::Continue
        }
    }
}
