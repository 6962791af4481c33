//! Bounded work queue between the walker and the worker pool
//!
//! A full queue blocks the producer until occupancy drains to a low-water
//! mark. The consumer pops with a retry budget: running out of retries with
//! no data means the producer is done, and a terminal event ends the loop
//! immediately. Nothing pushed is ever dropped.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::events::{CrawlEvent, CrawlObserver, Flow};

/// Timing and sizing of a work queue
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub capacity: usize,
    pub low_water: usize,
    /// Wait between occupancy checks while a push is blocked
    pub push_wait: Duration,
    /// Wait for data on each pop attempt
    pub pop_interval: Duration,
    pub pop_retry_budget: u32,
}

impl QueueSettings {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            capacity: config.queue_capacity,
            low_water: config.queue_low_water,
            push_wait: Duration::from_millis(config.push_wait_ms.max(1)),
            pop_interval: Duration::from_millis(config.pop_interval_ms),
            pop_retry_budget: config.pop_retry_budget,
        }
    }
}

/// Statistics for the work queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Total events enqueued
    pub enqueued: AtomicU64,

    /// Total events dequeued
    pub dequeued: AtomicU64,

    /// Number of times a push found the queue full
    pub backpressure_events: AtomicU64,

    /// Pop attempts that timed out with no data
    pub empty_pops: AtomicU64,
}

impl QueueStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }

    pub fn backpressure_count(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }
}

/// FIFO of crawl events with a fixed capacity
pub struct WorkQueue {
    sender: Sender<CrawlEvent>,
    receiver: Receiver<CrawlEvent>,
    settings: QueueSettings,
    /// Set by the consumer once it stops popping
    closed: AtomicBool,
    stats: Arc<QueueStats>,
}

impl WorkQueue {
    pub fn new(settings: QueueSettings) -> Self {
        let (sender, receiver) = bounded(settings.capacity.max(1));
        Self {
            sender,
            receiver,
            settings,
            closed: AtomicBool::new(false),
            stats: Arc::new(QueueStats::default()),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn stats(&self) -> Arc<QueueStats> {
        Arc::clone(&self.stats)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.settings.capacity
    }

    /// Mark the consumer side as gone; later pushes fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Push an event, blocking while the queue is full
    ///
    /// Once full, the push waits until occupancy falls to the low-water mark.
    /// Fails only when the consumer side has been closed.
    pub fn push(&self, event: CrawlEvent) -> Result<()> {
        if self.is_closed() {
            return Err(CrawlError::queue_error("Queue consumer is closed"));
        }
        let event = match self.sender.try_send(event) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Err(TrySendError::Full(event)) => event,
            Err(TrySendError::Disconnected(_)) => {
                return Err(CrawlError::queue_error("Queue is disconnected"));
            }
        };

        self.stats.backpressure_events.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Queue full ({} events), waiting for it to drain to {}",
            self.len(),
            self.settings.low_water
        );
        while self.len() > self.settings.low_water {
            if self.is_closed() {
                return Err(CrawlError::queue_error(
                    "Queue consumer closed while waiting for space",
                ));
            }
            std::thread::sleep(self.settings.push_wait);
        }
        self.sender
            .send(event)
            .map_err(|_| CrawlError::queue_error("Queue is disconnected"))?;
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the next event, retrying while the queue is empty
    ///
    /// Returns `Ok(None)` once the retry budget is spent without data.
    pub fn pop(&self) -> Result<Option<CrawlEvent>> {
        if self.settings.pop_retry_budget == 0 {
            return Ok(self.receiver.try_recv().ok().inspect(|_| {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
            }));
        }
        for attempt in 1..=self.settings.pop_retry_budget {
            match self.receiver.recv_timeout(self.settings.pop_interval) {
                Ok(event) => {
                    self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(event));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.stats.empty_pops.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "Queue empty, {} retries left",
                        self.settings.pop_retry_budget - attempt
                    );
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CrawlError::queue_error("Queue is disconnected"));
                }
            }
        }
        log::info!(
            "Queue empty after {} retries, assuming the producer is done",
            self.settings.pop_retry_budget
        );
        Ok(None)
    }
}

/// Bridges crawled and terminal events onto a work queue
pub struct QueueObserver {
    queue: Arc<WorkQueue>,
}

impl QueueObserver {
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self { queue }
    }
}

impl CrawlObserver for QueueObserver {
    fn name(&self) -> &str {
        "queue"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow> {
        if !event.is_crawled() && !event.is_terminal() {
            return Ok(Flow::Continue);
        }
        match self.queue.push(event.clone()) {
            Ok(()) => Ok(Flow::Continue),
            Err(e) => {
                log::error!("Unable to queue {} event: {}", event.name(), e);
                Ok(Flow::Stop)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::models::{PathEntry, RunSnapshot};
    use proptest::prelude::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn settings(capacity: usize, low_water: usize, budget: u32, interval_ms: u64) -> QueueSettings {
        QueueSettings {
            capacity,
            low_water,
            push_wait: Duration::from_millis(5),
            pop_interval: Duration::from_millis(interval_ms),
            pop_retry_budget: budget,
        }
    }

    fn crawled(name: &str) -> CrawlEvent {
        let entry = PathEntry::file(PathBuf::from(format!("/d/{}", name)), "/d", Some(1));
        CrawlEvent::new(EventKind::FileCrawled { entry }, RunSnapshot::default())
    }

    fn name_of(event: &CrawlEvent) -> String {
        event.entry().map(|e| e.name.clone()).unwrap_or_default()
    }

    #[test]
    fn test_full_queue_blocks_until_low_water() {
        let queue = Arc::new(WorkQueue::new(settings(2, 0, 10, 50)));
        queue.push(crawled("1")).unwrap();
        queue.push(crawled("2")).unwrap();

        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(100));
                let mut names = Vec::new();
                while let Some(event) = queue.pop().unwrap() {
                    names.push(name_of(&event));
                    if names.len() == 3 {
                        break;
                    }
                }
                names
            })
        };

        let started = Instant::now();
        queue.push(crawled("3")).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));

        let names = consumer.join().unwrap();
        assert_eq!(names, vec!["1", "2", "3"]);
        assert_eq!(queue.stats().backpressure_count(), 1);
        assert_eq!(queue.stats().enqueued(), 3);
    }

    #[test]
    fn test_empty_pop_terminates_within_budget() {
        let queue = WorkQueue::new(settings(4, 0, 3, 20));
        let started = Instant::now();
        assert!(queue.pop().unwrap().is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_push_fails_after_close() {
        let queue = WorkQueue::new(settings(1, 0, 1, 10));
        queue.push(crawled("a")).unwrap();
        queue.close();
        assert!(queue.push(crawled("b")).is_err());
    }

    #[test]
    fn test_queue_observer_forwards_crawled_and_terminal_only() {
        let queue = Arc::new(WorkQueue::new(settings(8, 0, 1, 10)));
        let observer = QueueObserver::new(Arc::clone(&queue));

        let progress = CrawlEvent::new(EventKind::CrawlProgress, RunSnapshot::default());
        let done = CrawlEvent::new(EventKind::CrawlCompleted, RunSnapshot::default());
        assert_eq!(observer.on_event(&progress).unwrap(), Flow::Continue);
        assert_eq!(observer.on_event(&crawled("a")).unwrap(), Flow::Continue);
        assert_eq!(observer.on_event(&done).unwrap(), Flow::Continue);

        assert_eq!(queue.len(), 2);
        assert!(queue.pop().unwrap().unwrap().is_crawled());
        assert!(queue.pop().unwrap().unwrap().is_terminal());
    }

    #[test]
    fn test_queue_observer_requests_stop_on_push_failure() {
        let queue = Arc::new(WorkQueue::new(settings(1, 0, 1, 10)));
        queue.close();
        let observer = QueueObserver::new(queue);
        assert_eq!(observer.on_event(&crawled("a")).unwrap(), Flow::Stop);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_fifo_without_loss(count in 1usize..40, capacity in 1usize..6) {
            let queue = Arc::new(WorkQueue::new(settings(capacity, 0, 20, 20)));
            let producer = {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..count {
                        queue.push(crawled(&i.to_string())).unwrap();
                    }
                })
            };
            let mut names = Vec::new();
            while names.len() < count {
                match queue.pop().unwrap() {
                    Some(event) => names.push(name_of(&event)),
                    None => break,
                }
            }
            producer.join().unwrap();
            let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
            prop_assert_eq!(names, expected);
        }
    }
}
