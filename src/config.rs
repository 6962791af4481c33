//! Configuration for the crawler

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CrawlError, Result};
use crate::filters::{FilterChain, FilterSpec};
use crate::models::{Classification, PathEntry, PathKind};
use crate::processors::{HashAlgorithm, DEFAULT_HASH_CHUNK_SIZE};

/// Default work queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 20_000;

/// Default occupancy a full queue must drain to before a push resumes
pub const DEFAULT_QUEUE_LOW_WATER: usize = 100;

/// Default wait between push retries on a full queue (ms)
pub const DEFAULT_PUSH_WAIT_MS: u64 = 100;

/// Default consumer pop retry budget
pub const DEFAULT_POP_RETRY_BUDGET: u32 = 10;

/// Default wait between pop retries (ms)
pub const DEFAULT_POP_INTERVAL_MS: u64 = 1000;

/// Default emission interval of progress events (found paths)
pub const DEFAULT_PROGRESS_EVERY: u64 = 1000;

/// Default batch size of the stage-advance pass
pub const DEFAULT_STAGE_BATCH_SIZE: usize = 2000;

/// One configured crawl root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSpec {
    /// Directory to crawl
    pub base_dir: PathBuf,
    /// Prefix stripped from full paths to build relative paths.
    /// Defaults to the resolved base directory.
    #[serde(default)]
    pub virtual_root: Option<String>,
    /// Classification propagated to every path below the root
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub target_table: Option<String>,
}

impl RootSpec {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            virtual_root: None,
            classification: None,
            target_table: None,
        }
    }

    pub fn with_virtual_root(mut self, prefix: impl Into<String>) -> Self {
        self.virtual_root = Some(prefix.into());
        self
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }
}

/// When a stored record counts as identical to a freshly crawled one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Any stored record
    Exists,
    /// Same size
    Size,
    /// Same size, and same modify time for files
    SizeAndModified,
    /// Same size, and for files same modify time with a hash already stored
    #[default]
    SizeModifiedAndHashed,
}

impl IdentityPolicy {
    /// Whether `stored` makes processing `fresh` again unnecessary
    pub fn is_unchanged(&self, stored: &PathEntry, fresh: &PathEntry) -> bool {
        if stored.kind != fresh.kind || stored.stage == crate::models::Stage::PathDeleted {
            return false;
        }
        let same_size = stored.size == fresh.size;
        let same_modified = stored.modified.map(|t| t.timestamp_micros())
            == fresh.modified.map(|t| t.timestamp_micros());
        match self {
            IdentityPolicy::Exists => true,
            IdentityPolicy::Size => same_size,
            _ if fresh.kind == PathKind::Directory => same_size,
            IdentityPolicy::SizeAndModified => same_size && same_modified,
            IdentityPolicy::SizeModifiedAndHashed => {
                same_size && same_modified && stored.hash.is_some()
            }
        }
    }
}

/// What to do with zero-size entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistEmpty {
    /// Run processors and persist like any other entry
    Full,
    /// Persist the crawled record without running processors
    #[default]
    Partial,
    /// Do not persist
    Skip,
}

/// Configuration for a crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Roots to crawl, in order
    pub roots: Vec<RootSpec>,

    /// Filters that prune traversal (AND)
    pub skip_filters: Vec<FilterSpec>,

    /// Filters that restrict reporting (OR); empty means report everything
    pub notify_filters: Vec<FilterSpec>,

    /// Maximum number of queued events
    pub queue_capacity: usize,

    /// Occupancy a full queue must drain to before a blocked push resumes
    pub queue_low_water: usize,

    /// Wait between occupancy checks while a push is blocked (ms)
    pub push_wait_ms: u64,

    /// Empty pops tolerated before the consumer assumes the producer is done
    pub pop_retry_budget: u32,

    /// Wait for data on each pop attempt (ms)
    pub pop_interval_ms: u64,

    /// Number of worker threads
    /// 0 means auto-detect (CPU cores × 2)
    pub max_workers: usize,

    /// In-flight tasks above which the consumer pauses submissions
    /// 0 means 4 × workers
    pub inflight_high: usize,

    /// In-flight tasks below which a paused consumer resumes
    /// 0 means 2 × workers
    pub inflight_low: usize,

    /// Reprocess paths even when the stored record is unchanged
    pub force_refresh: bool,

    pub identity_policy: IdentityPolicy,

    /// Algorithms computed by the hash processor; the first one fills `hash`
    pub hash_algorithms: Vec<HashAlgorithm>,

    /// Read chunk of the hash processor (bytes)
    pub hash_chunk_size: usize,

    /// Emit a progress event every N found paths
    pub progress_every: u64,

    pub persist_empty: PersistEmpty,

    /// Database path for storing results
    pub db_path: Option<PathBuf>,

    /// Entries fetched per batch by the stage-advance pass
    pub stage_batch_size: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            skip_filters: Vec::new(),
            notify_filters: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_low_water: DEFAULT_QUEUE_LOW_WATER,
            push_wait_ms: DEFAULT_PUSH_WAIT_MS,
            pop_retry_budget: DEFAULT_POP_RETRY_BUDGET,
            pop_interval_ms: DEFAULT_POP_INTERVAL_MS,
            max_workers: 0,
            inflight_high: 0,
            inflight_low: 0,
            force_refresh: false,
            identity_policy: IdentityPolicy::default(),
            hash_algorithms: vec![HashAlgorithm::default()],
            hash_chunk_size: DEFAULT_HASH_CHUNK_SIZE,
            progress_every: DEFAULT_PROGRESS_EVERY,
            persist_empty: PersistEmpty::default(),
            db_path: None,
            stage_batch_size: DEFAULT_STAGE_BATCH_SIZE,
        }
    }
}

impl CrawlConfig {
    /// Create a new config with the given root directories
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().map(RootSpec::new).collect(),
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::new()
    }

    /// Load a config from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::config_error(format!("Unable to read config {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse a config from TOML; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(CrawlError::config_error("At least one root is required"));
        }
        if self.queue_capacity == 0 {
            return Err(CrawlError::config_error("queue_capacity must be positive"));
        }
        if self.queue_low_water >= self.queue_capacity {
            return Err(CrawlError::config_error(format!(
                "queue_low_water ({}) must be below queue_capacity ({})",
                self.queue_low_water, self.queue_capacity
            )));
        }
        if self.inflight_low > self.effective_inflight_high() {
            return Err(CrawlError::config_error(format!(
                "inflight_low ({}) must not exceed inflight_high ({})",
                self.inflight_low,
                self.effective_inflight_high()
            )));
        }
        if self.stage_batch_size == 0 {
            return Err(CrawlError::config_error("stage_batch_size must be positive"));
        }
        FilterChain::from_specs(&self.skip_filters, &self.notify_filters)?;
        Ok(())
    }

    /// Get the effective number of worker threads
    pub fn effective_workers(&self) -> usize {
        if self.max_workers == 0 {
            // Auto-detect: CPU cores × 2
            std::thread::available_parallelism()
                .map(|p| p.get() * 2)
                .unwrap_or(4)
        } else {
            self.max_workers
        }
    }

    pub fn effective_inflight_high(&self) -> usize {
        if self.inflight_high == 0 {
            self.effective_workers() * 4
        } else {
            self.inflight_high
        }
    }

    pub fn effective_inflight_low(&self) -> usize {
        if self.inflight_low == 0 {
            (self.effective_workers() * 2).min(self.effective_inflight_high())
        } else {
            self.inflight_low
        }
    }
}

/// Builder for CrawlConfig
#[derive(Debug, Default)]
pub struct CrawlConfigBuilder {
    config: CrawlConfig,
}

impl CrawlConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config, e.g. one loaded from a file
    pub fn from_config(config: CrawlConfig) -> Self {
        Self { config }
    }

    /// Add a root directory
    pub fn add_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.roots.push(RootSpec::new(root));
        self
    }

    /// Add a fully described root
    pub fn add_root_spec(mut self, root: RootSpec) -> Self {
        self.config.roots.push(root);
        self
    }

    pub fn skip_filter(mut self, filter: FilterSpec) -> Self {
        self.config.skip_filters.push(filter);
        self
    }

    pub fn notify_filter(mut self, filter: FilterSpec) -> Self {
        self.config.notify_filters.push(filter);
        self
    }

    /// Set queue capacity and low-water mark
    pub fn queue(mut self, capacity: usize, low_water: usize) -> Self {
        self.config.queue_capacity = capacity;
        self.config.queue_low_water = low_water;
        self
    }

    pub fn push_wait_ms(mut self, ms: u64) -> Self {
        self.config.push_wait_ms = ms;
        self
    }

    /// Set the consumer pop retry budget and interval
    pub fn pop_retry(mut self, budget: u32, interval_ms: u64) -> Self {
        self.config.pop_retry_budget = budget;
        self.config.pop_interval_ms = interval_ms;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    /// Set the in-flight high and low thresholds
    pub fn inflight(mut self, high: usize, low: usize) -> Self {
        self.config.inflight_high = high;
        self.config.inflight_low = low;
        self
    }

    pub fn force_refresh(mut self, enabled: bool) -> Self {
        self.config.force_refresh = enabled;
        self
    }

    pub fn identity_policy(mut self, policy: IdentityPolicy) -> Self {
        self.config.identity_policy = policy;
        self
    }

    pub fn hash_algorithms(mut self, algorithms: Vec<HashAlgorithm>) -> Self {
        self.config.hash_algorithms = algorithms;
        self
    }

    pub fn hash_chunk_size(mut self, size: usize) -> Self {
        self.config.hash_chunk_size = size;
        self
    }

    pub fn progress_every(mut self, every: u64) -> Self {
        self.config.progress_every = every;
        self
    }

    pub fn persist_empty(mut self, policy: PersistEmpty) -> Self {
        self.config.persist_empty = policy;
        self
    }

    /// Set the database path
    pub fn db_path(mut self, path: PathBuf) -> Self {
        self.config.db_path = Some(path);
        self
    }

    pub fn stage_batch_size(mut self, size: usize) -> Self {
        self.config.stage_batch_size = size;
        self
    }

    /// Build the config
    pub fn build(self) -> CrawlConfig {
        self.config
    }
}
