//! Crawl orchestration
//!
//! Runs the walker on the calling thread and the worker pool on a scoped
//! thread, connected only by the work queue.

use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::CrawlConfig;
use crate::db::PathRepository;
use crate::error::{CrawlError, CrawlErrorKind, Result};
use crate::events::CrawlObserver;
use crate::filters::FilterChain;
use crate::models::RunSummary;
use crate::observers::EmptyDirectoryObserver;
use crate::processors::{
    AttributesProcessor, HashProcessor, KeywordsProcessor, PathProcessor, RatingProcessor,
};
use crate::queue::{QueueObserver, QueueSettings, WorkQueue};
use crate::stage::StagePipeline;
use crate::walker::Walker;
use crate::worker::{PoolReport, PoolSettings, WorkerPool};

/// Everything a finished crawl reports
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub summary: RunSummary,
    pub empty_directories: Vec<String>,
    /// Times the walker blocked on a full queue
    pub queue_backpressure: u64,
    #[serde(skip)]
    pub pool: PoolReport,
}

/// Walker, work queue and worker pool wired from a config
pub struct Crawler {
    config: CrawlConfig,
    repository: Option<Arc<dyn PathRepository>>,
    processors: Vec<Arc<dyn PathProcessor>>,
    observers: Vec<Arc<dyn CrawlObserver>>,
    stop: Arc<AtomicBool>,
}

impl Crawler {
    /// Validate the config; invalid configs never start a walk
    pub fn new(config: CrawlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            repository: None,
            processors: Vec::new(),
            observers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn with_repository(mut self, repository: Arc<dyn PathRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Register the attributes, hash, keywords and rating processors, in that order
    pub fn with_default_processors(mut self) -> Self {
        self.add_processor(Arc::new(AttributesProcessor::new()));
        self.add_processor(Arc::new(HashProcessor::new(
            self.config.hash_algorithms.clone(),
            self.config.hash_chunk_size,
        )));
        self.add_processor(Arc::new(KeywordsProcessor::new()));
        self.add_processor(Arc::new(RatingProcessor::new()));
        self
    }

    pub fn add_processor(&mut self, processor: Arc<dyn PathProcessor>) {
        self.processors.push(processor);
    }

    /// Subscribe an observer to the walk and to worker errors
    pub fn add_observer(&mut self, observer: Arc<dyn CrawlObserver>) -> bool {
        if self.observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Setting the returned flag stops the walk at its next notification
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Crawl every configured root and process what it reports
    pub fn run(&self) -> Result<CrawlReport> {
        let filters =
            FilterChain::from_specs(&self.config.skip_filters, &self.config.notify_filters)?;
        let mut walker = Walker::new(filters)
            .with_progress_every(self.config.progress_every)
            .with_stop_handle(Arc::clone(&self.stop));
        for root in &self.config.roots {
            walker.add_root(root.clone())?;
        }

        let queue = Arc::new(WorkQueue::new(QueueSettings::from_config(&self.config)));
        let empty_directories = Arc::new(EmptyDirectoryObserver::new());
        walker.subscribe(Arc::new(QueueObserver::new(Arc::clone(&queue))));
        walker.subscribe(empty_directories.clone());
        for observer in &self.observers {
            walker.subscribe(Arc::clone(observer));
        }

        let mut pipeline = StagePipeline::from_config(&self.config);
        if let Some(repository) = &self.repository {
            pipeline = pipeline.with_repository(Arc::clone(repository));
        }
        for processor in &self.processors {
            pipeline.add_processor(Arc::clone(processor));
        }
        let mut pool = WorkerPool::new(Arc::new(pipeline), PoolSettings::from_config(&self.config));
        for observer in &self.observers {
            pool.subscribe(Arc::clone(observer));
        }

        let (walk, consumed) = std::thread::scope(|scope| {
            let consumer = scope.spawn(|| pool.run(&queue));
            let walk = walker.run();
            (walk, consumer.join())
        });
        let pool_report = consumed.map_err(|_| {
            CrawlError::new(CrawlErrorKind::Unknown, None, "Worker pool panicked")
        })??;

        let empty = empty_directories.empty_directories()?;
        let summary = RunSummary {
            stopped: walk.stopped || pool_report.stopped,
            walk: walk.run,
            paths_persisted: pool_report.persisted,
            paths_unchanged: pool_report.unchanged,
            processor_errors: pool_report.processor_errors,
            persistence_errors: pool_report.persistence_errors,
            empty_directories: empty.len(),
        };
        log::info!(
            "Crawl {}: {} paths processed, {} persisted, {} empty directories, {} errors",
            if summary.stopped { "stopped" } else { "completed" },
            summary.walk.paths_processed(),
            summary.paths_persisted,
            summary.empty_directories,
            summary.error_count()
        );

        Ok(CrawlReport {
            summary,
            empty_directories: empty,
            queue_backpressure: queue.stats().backpressure_count(),
            pool: pool_report,
        })
    }
}
