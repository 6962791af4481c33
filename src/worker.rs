//! Worker pool consumer
//!
//! Pops crawled events off the work queue and fans them out to a fixed-size
//! rayon pool. Submissions pause once too many tasks are in flight and resume
//! when the backlog drains to a low mark. The scope joins every task before
//! the pool reports its totals.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::events::{CrawlEvent, CrawlObserver, EventBus, EventKind};
use crate::models::Stage;
use crate::queue::WorkQueue;
use crate::stage::{PathOutcome, PathStatus, StagePipeline};

/// Errors kept per path in the report
const MAX_ERRORED_PATHS: usize = 2000;

/// Concurrency limits of the pool
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub workers: usize,
    /// In-flight tasks at which submissions pause
    pub inflight_high: usize,
    /// In-flight tasks at which paused submissions resume
    pub inflight_low: usize,
}

impl PoolSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            workers: config.effective_workers(),
            inflight_high: config.effective_inflight_high(),
            inflight_low: config.effective_inflight_low(),
        }
    }
}

/// Totals of one consumer run
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    /// Crawled events handed to workers
    pub submitted: u64,
    pub persisted: u64,
    pub unchanged: u64,
    pub skipped_empty: u64,
    pub deleted: u64,
    pub processor_errors: u64,
    pub persistence_errors: u64,
    /// Times submissions paused on the in-flight high mark
    pub throttled: u64,
    /// The loop ended on a stop request or a stopped producer
    pub stopped: bool,
    /// Failure messages by path
    pub errors: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    persisted: AtomicU64,
    unchanged: AtomicU64,
    skipped_empty: AtomicU64,
    deleted: AtomicU64,
    processor_errors: AtomicU64,
    persistence_errors: AtomicU64,
    throttled: AtomicU64,
    errors: Mutex<BTreeMap<String, Vec<String>>>,
}

impl PoolCounters {
    fn record(&self, outcome: &PathOutcome) {
        let counter = match outcome.status {
            PathStatus::Unchanged => &self.unchanged,
            PathStatus::SkippedEmpty => &self.skipped_empty,
            PathStatus::PersistFailed => &self.persistence_errors,
            PathStatus::Persisted | PathStatus::Processed => &self.persisted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if outcome.stage == Stage::PathDeleted && outcome.status != PathStatus::Unchanged {
            self.deleted.fetch_add(1, Ordering::Relaxed);
        }
        if outcome.failures.is_empty() && outcome.status != PathStatus::PersistFailed {
            return;
        }

        self.processor_errors
            .fetch_add(outcome.failures.len() as u64, Ordering::Relaxed);
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        if errors.len() >= MAX_ERRORED_PATHS && !errors.contains_key(&outcome.path) {
            return;
        }
        let messages = errors.entry(outcome.path.clone()).or_default();
        messages.extend(
            outcome
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.processor, f.error.message)),
        );
        if outcome.status == PathStatus::PersistFailed {
            messages.push("persistence failed".to_string());
        }
    }

    fn report(&self, stopped: bool) -> PoolReport {
        PoolReport {
            submitted: self.submitted.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            skipped_empty: self.skipped_empty.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            processor_errors: self.processor_errors.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            stopped,
            errors: self
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Count of tasks submitted and not finished yet
#[derive(Default)]
struct InFlight {
    count: Mutex<usize>,
    changed: Condvar,
}

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> usize {
        *self.lock()
    }

    fn begin(&self) {
        *self.lock() += 1;
    }

    fn end(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }

    fn wait_until_at_most(&self, low: usize) {
        let mut count = self.lock();
        while *count > low {
            count = self
                .changed
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Ends one in-flight task, also when the task unwinds
struct TaskGuard<'a>(&'a InFlight);

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Closes the queue on every way out of the consumer loop
struct CloseOnDrop<'a>(&'a WorkQueue);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Fixed-size pool draining a work queue through a stage pipeline
pub struct WorkerPool {
    pipeline: Arc<StagePipeline>,
    settings: PoolSettings,
    bus: EventBus,
    counters: PoolCounters,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<StagePipeline>, settings: PoolSettings) -> Self {
        Self {
            pipeline,
            settings,
            bus: EventBus::new(),
            counters: PoolCounters::default(),
        }
    }

    /// Observers notified of per-path processing errors
    pub fn subscribe(&mut self, observer: Arc<dyn CrawlObserver>) -> bool {
        self.bus.subscribe(observer)
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Drain the queue until it runs dry or the producer ends
    ///
    /// Closes the queue once the loop is done, so a producer still pushing
    /// sees the failure and stops.
    pub fn run(&self, queue: &WorkQueue) -> Result<PoolReport> {
        let closer = CloseOnDrop(queue);
        let workers = self.settings.workers.max(1);
        let high = self.settings.inflight_high.max(1);
        let low = self.settings.inflight_low.min(high - 1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("crawl-worker-{}", i))
            .build()
            .map_err(|e| CrawlError::config_error(format!("Unable to start worker pool: {}", e)))?;
        log::info!("Worker pool started with {} workers", workers);

        let inflight = InFlight::default();
        let stopped = pool.in_place_scope(|scope| {
            loop {
                if inflight.current() >= high {
                    self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                    log::debug!("{} tasks in flight, waiting for {}", high, low);
                    inflight.wait_until_at_most(low);
                }

                let event = match queue.pop() {
                    Ok(Some(event)) => event,
                    Ok(None) => break false,
                    Err(e) => {
                        log::error!("Unable to pop from work queue: {}", e);
                        break true;
                    }
                };
                if event.should_stop || event.is_terminal() {
                    log::info!("Consumer received {}, finishing", event.name());
                    break event.should_stop || matches!(event.kind, EventKind::CrawlStopped);
                }
                if !event.is_crawled() {
                    continue;
                }

                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                inflight.begin();
                let inflight = &inflight;
                scope.spawn(move |_| {
                    let _task = TaskGuard(inflight);
                    self.handle(event);
                });
            }
        });
        drop(closer);

        let report = self.counters.report(stopped);
        log::info!(
            "Worker pool done: {} submitted, {} persisted, {} unchanged, {} errors",
            report.submitted,
            report.persisted,
            report.unchanged,
            report.processor_errors + report.persistence_errors
        );
        Ok(report)
    }

    fn handle(&self, event: CrawlEvent) {
        let Some(entry) = event.entry().cloned() else {
            return;
        };
        let outcome = self.pipeline.process_crawled(Some(&event), entry);
        self.counters.record(&outcome);
        if self.bus.is_empty() {
            return;
        }
        for failure in &outcome.failures {
            let mut error = CrawlEvent::new(
                EventKind::CrawlError {
                    path: failure.error.path.clone(),
                    message: format!("{}: {}", failure.processor, failure.error.message),
                },
                event.run.clone(),
            );
            self.bus.publish(&mut error);
        }
    }
}
