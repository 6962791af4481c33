//! Filesystem inventory crawler
//!
//! A single-threaded walker emits lifecycle events while traversing roots;
//! a queue observer hands crawled paths to a bounded work queue that a
//! worker pool drains through a processor chain into a path repository.

pub mod config;
pub mod crawler;
pub mod db;
pub mod error;
pub mod events;
pub mod filters;
pub mod models;
pub mod observers;
pub mod processors;
pub mod progress;
pub mod queue;
pub mod stage;
pub mod walker;
pub mod worker;

pub use config::{CrawlConfig, CrawlConfigBuilder, IdentityPolicy, PersistEmpty, RootSpec};
pub use crawler::{CrawlReport, Crawler};
pub use db::{DuplicateGroup, DuplicateMember, PathRepository, SqliteRepository};
pub use error::{CrawlError, CrawlErrorKind, Result};
pub use events::{CrawlEvent, CrawlObserver, EventBus, EventKind, Flow};
pub use filters::{
    Candidate, DateFilter, DepthFilter, ExtensionFilter, FilterChain, FilterSpec, GlobFilter,
    NameFilter, PathFilter, RegexFilter, SizeFilter, TimestampField, Verdict,
};
pub use models::{
    Classification, ContentCategory, ContentFamily, MinAge, PathEntry, PathKind, PlatformFlags,
    RunSnapshot, RunSummary, Stage,
};
pub use observers::{EmptyDirectoryObserver, LoggingObserver, MetricsCollector, MetricsReport};
pub use processors::{
    Applicability, AttributesProcessor, HashAlgorithm, HashProcessor, KeywordsProcessor,
    PathProcessor, RatingProcessor,
};
pub use progress::{
    CrawlPhase, DoneMessage, ErrorProgressMessage, ProgressMessage, ProgressReporter, StartMessage,
};
pub use queue::{QueueObserver, QueueSettings, WorkQueue};
pub use stage::{AdvanceReport, PathOutcome, PathStatus, StageAdvancer, StagePipeline};
pub use walker::{RunStats, WalkReport, Walker};
pub use worker::{PoolReport, PoolSettings, WorkerPool};
