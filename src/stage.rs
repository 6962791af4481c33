//! Per-path processing and stage progression
//!
//! [`StagePipeline`] turns a crawled entry into a persisted record: identity
//! check against the repository, applicable processors in registration order,
//! stage merge, upsert. [`StageAdvancer`] replays the same processors over
//! records already stored at a given stage, without walking.

use rayon::prelude::*;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::{CrawlConfig, IdentityPolicy, PersistEmpty, DEFAULT_STAGE_BATCH_SIZE};
use crate::db::PathRepository;
use crate::error::{CrawlError, Result};
use crate::events::CrawlEvent;
use crate::models::{PathEntry, PathKind, Stage};
use crate::processors::PathProcessor;

/// A processor that failed on one path
#[derive(Debug)]
pub struct ProcessorFailure {
    pub processor: String,
    pub error: CrawlError,
}

/// What happened to a path handed to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    /// Stored record matched; nothing ran and nothing was written
    Unchanged,
    /// Empty entry dropped by the persistence policy
    SkippedEmpty,
    /// Processors ran and the record was upserted
    Persisted,
    /// Processors ran with no repository attached
    Processed,
    /// The upsert failed
    PersistFailed,
}

#[derive(Debug)]
pub struct PathOutcome {
    pub path: String,
    pub status: PathStatus,
    pub stage: Stage,
    pub failures: Vec<ProcessorFailure>,
}

impl PathOutcome {
    fn new(entry: &PathEntry, status: PathStatus) -> Self {
        Self {
            path: entry.full_path(),
            status,
            stage: entry.stage,
            failures: Vec::new(),
        }
    }
}

/// Ordered processor chain plus persistence
pub struct StagePipeline {
    processors: Vec<Arc<dyn PathProcessor>>,
    repository: Option<Arc<dyn PathRepository>>,
    identity_policy: IdentityPolicy,
    force_refresh: bool,
    persist_empty: PersistEmpty,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StagePipeline {
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
            repository: None,
            identity_policy: IdentityPolicy::default(),
            force_refresh: false,
            persist_empty: PersistEmpty::default(),
        }
    }

    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            identity_policy: config.identity_policy,
            force_refresh: config.force_refresh,
            persist_empty: config.persist_empty,
            ..Self::new()
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn PathRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn with_identity_policy(mut self, policy: IdentityPolicy) -> Self {
        self.identity_policy = policy;
        self
    }

    pub fn with_persist_empty(mut self, policy: PersistEmpty) -> Self {
        self.persist_empty = policy;
        self
    }

    /// Append a processor; processors run in registration order
    pub fn add_processor(&mut self, processor: Arc<dyn PathProcessor>) {
        self.processors.push(processor);
    }

    pub fn processors(&self) -> &[Arc<dyn PathProcessor>] {
        &self.processors
    }

    pub fn repository(&self) -> Option<&Arc<dyn PathRepository>> {
        self.repository.as_ref()
    }

    /// Process an entry delivered by a crawled event
    pub fn process_crawled(&self, event: Option<&CrawlEvent>, mut entry: PathEntry) -> PathOutcome {
        let existing = self.lookup(&entry);

        if let Some(stored) = &existing {
            if !self.force_refresh && self.identity_policy.is_unchanged(stored, &entry) {
                log::debug!("Skipping {}: unchanged since {}", entry.full_path(), stored.stage);
                return PathOutcome::new(stored, PathStatus::Unchanged);
            }
        }

        let run_processors = if entry.is_empty() {
            match self.persist_empty {
                PersistEmpty::Skip => {
                    log::debug!("Skipping empty {}", entry.full_path());
                    return PathOutcome::new(&entry, PathStatus::SkippedEmpty);
                }
                PersistEmpty::Partial => false,
                PersistEmpty::Full => true,
            }
        } else {
            true
        };

        let (reached, failures) = if run_processors {
            self.run_processors(event, &mut entry)
        } else {
            (Stage::Crawled, Vec::new())
        };

        if let Some(stored) = &existing {
            inherit_unchanged_fields(stored, &mut entry);
        }
        let previous = existing.map(|s| s.stage).unwrap_or(Stage::Crawled);
        entry.stage = previous.merge(reached);
        self.persist(entry, failures)
    }

    /// Move a stored record forward through the processors
    ///
    /// Records at a terminal stage are left alone unless force-refresh is on.
    pub fn advance(&self, mut entry: PathEntry) -> PathOutcome {
        if entry.stage.is_terminal() && !self.force_refresh {
            return PathOutcome::new(&entry, PathStatus::Unchanged);
        }
        if std::fs::symlink_metadata(&entry.path).is_err() {
            log::info!("{} no longer exists", entry.full_path());
            entry.stage = Stage::PathDeleted;
            return self.persist(entry, Vec::new());
        }
        let (reached, failures) = self.run_processors(None, &mut entry);
        entry.stage = entry.stage.merge(reached);
        self.persist(entry, failures)
    }

    fn lookup(&self, entry: &PathEntry) -> Option<PathEntry> {
        let repository = self.repository.as_ref()?;
        match repository.get(&entry.full_path()) {
            Ok(stored) => stored,
            Err(e) => {
                log::error!("Unable to look up {}: {}", entry.full_path(), e);
                None
            }
        }
    }

    /// Run every applicable processor; returns the highest stage reached
    fn run_processors(
        &self,
        event: Option<&CrawlEvent>,
        entry: &mut PathEntry,
    ) -> (Stage, Vec<ProcessorFailure>) {
        let mut reached = Stage::Crawled;
        let mut failures = Vec::new();
        let mut missing = false;
        let kind = entry.kind;

        for processor in self
            .processors
            .iter()
            .filter(|p| p.applicability().matches(kind))
        {
            match run_guarded(processor.as_ref(), event, entry) {
                Ok(()) => {
                    if let Some(stage) = processor.stage() {
                        reached = reached.max(stage);
                    }
                }
                Err(error) => {
                    log::warn!(
                        "Processor '{}' failed on {}: {}",
                        processor.name(),
                        entry.full_path(),
                        error.message
                    );
                    missing |= error.is_not_found();
                    failures.push(ProcessorFailure {
                        processor: processor.name().to_string(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() && (missing || std::fs::symlink_metadata(&entry.path).is_err()) {
            log::info!("{} vanished during processing", entry.full_path());
            reached = Stage::PathDeleted;
        }
        (reached, failures)
    }

    fn persist(&self, entry: PathEntry, failures: Vec<ProcessorFailure>) -> PathOutcome {
        let status = match &self.repository {
            None => PathStatus::Processed,
            Some(repository) => match repository.save(&entry) {
                Ok(()) => PathStatus::Persisted,
                Err(e) => {
                    log::error!("Unable to persist {}: {}", entry.full_path(), e);
                    PathStatus::PersistFailed
                }
            },
        };
        let mut outcome = PathOutcome::new(&entry, status);
        outcome.failures = failures;
        outcome
    }
}

/// Run one processor, turning a panic into a processor error
fn run_guarded(
    processor: &dyn PathProcessor,
    event: Option<&CrawlEvent>,
    entry: &mut PathEntry,
) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.process(event, entry))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown cause".to_string());
            Err(CrawlError::processor_error(
                entry.path.clone(),
                format!("panicked: {}", reason),
            ))
        }
    }
}

/// Keep digests of an unchanged file when this pass did not recompute them
fn inherit_unchanged_fields(stored: &PathEntry, entry: &mut PathEntry) {
    let same_content = stored.kind == entry.kind
        && stored.size == entry.size
        && stored.modified.map(|t| t.timestamp_micros())
            == entry.modified.map(|t| t.timestamp_micros());
    if !same_content || entry.hash.is_some() {
        return;
    }
    entry.hash = stored.hash.clone();
    for (algorithm, digest) in &stored.hashes {
        entry
            .hashes
            .entry(algorithm.clone())
            .or_insert_with(|| digest.clone());
    }
}

/// Totals of a stage-advance pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub examined: u64,
    pub advanced: u64,
    pub unchanged: u64,
    pub deleted: u64,
    pub processor_errors: u64,
    pub persistence_errors: u64,
}

/// Re-scan of stored records at a (kind, stage), independent of crawling
pub struct StageAdvancer {
    pipeline: Arc<StagePipeline>,
    batch_size: usize,
}

impl StageAdvancer {
    pub fn new(pipeline: Arc<StagePipeline>) -> Self {
        Self {
            pipeline,
            batch_size: DEFAULT_STAGE_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Advance every stored `kind` entry currently at `stage`
    ///
    /// Each record is handed to the pipeline at most once per pass, so records
    /// that stay at `stage` do not make the pass loop forever.
    pub fn advance(&self, kind: PathKind, stage: Stage) -> Result<AdvanceReport> {
        let repository = self
            .pipeline
            .repository()
            .ok_or_else(|| CrawlError::config_error("Stage advance requires a repository"))?;

        let mut report = AdvanceReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        loop {
            let wanted = seen.len() + self.batch_size;
            let stored = repository.find_by_stage(kind, stage, wanted)?;
            let exhausted = stored.len() < wanted;
            let batch: Vec<PathEntry> = stored
                .into_iter()
                .filter(|e| seen.insert(e.full_path()))
                .collect();
            if batch.is_empty() {
                break;
            }

            log::info!(
                "Advancing {} {} entries at {}",
                batch.len(),
                kind.as_str().to_lowercase(),
                stage
            );
            let outcomes: Vec<PathOutcome> = batch
                .into_par_iter()
                .map(|entry| self.pipeline.advance(entry))
                .collect();
            for outcome in &outcomes {
                report.examined += 1;
                report.processor_errors += outcome.failures.len() as u64;
                match outcome.status {
                    PathStatus::Unchanged | PathStatus::SkippedEmpty => report.unchanged += 1,
                    PathStatus::PersistFailed => report.persistence_errors += 1,
                    PathStatus::Persisted | PathStatus::Processed => {
                        if outcome.stage == Stage::PathDeleted {
                            report.deleted += 1;
                        } else if outcome.stage != stage {
                            report.advanced += 1;
                        } else {
                            report.unchanged += 1;
                        }
                    }
                }
            }
            if exhausted {
                break;
            }
        }

        log::info!(
            "Stage pass done: {} examined, {} advanced, {} deleted, {} errors",
            report.examined,
            report.advanced,
            report.deleted,
            report.processor_errors + report.persistence_errors
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;
    use crate::processors::{Applicability, HashProcessor};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts invocations and reaches a fixed stage
    struct Counting {
        calls: AtomicUsize,
        applicability: Applicability,
        stage: Option<Stage>,
        fail: bool,
    }

    impl Counting {
        fn new(applicability: Applicability, stage: Option<Stage>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                applicability,
                stage,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                applicability: Applicability::All,
                stage: Some(Stage::TextExtracted),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PathProcessor for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn applicability(&self) -> Applicability {
            self.applicability
        }

        fn stage(&self) -> Option<Stage> {
            self.stage
        }

        fn process(&self, _event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CrawlError::processor_error(entry.path.clone(), "boom"));
            }
            entry.tags.insert("seen".into(), "yes".into());
            Ok(())
        }
    }

    fn file_entry(tmp: &TempDir, name: &str, content: &[u8]) -> PathEntry {
        let path = tmp.path().join(name);
        fs::write(&path, content).unwrap();
        let mut entry = PathEntry::file(path, "", Some(content.len() as u64));
        entry.modified = fs::metadata(&entry.path)
            .unwrap()
            .modified()
            .ok()
            .map(Into::into);
        entry
    }

    fn repository() -> Arc<SqliteRepository> {
        Arc::new(SqliteRepository::open_memory().unwrap())
    }

    #[test]
    fn test_processors_run_by_applicability_and_stage_is_highest() {
        let tmp = TempDir::new().unwrap();
        let files_only = Counting::new(Applicability::File, Some(Stage::AttributesExtracted));
        let dirs_only = Counting::new(Applicability::Directory, Some(Stage::Indexed));
        let mut pipeline = StagePipeline::new();
        pipeline.add_processor(files_only.clone());
        pipeline.add_processor(dirs_only.clone());
        pipeline.add_processor(Arc::new(HashProcessor::default()));

        let outcome = pipeline.process_crawled(None, file_entry(&tmp, "a.txt", b"hello"));
        assert_eq!(outcome.status, PathStatus::Processed);
        assert_eq!(outcome.stage, Stage::HashComputed);
        assert_eq!(files_only.calls(), 1);
        assert_eq!(dirs_only.calls(), 0);
    }

    #[test]
    fn test_failing_processor_does_not_stop_the_chain() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let after = Counting::new(Applicability::All, Some(Stage::AttributesExtracted));
        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(Counting::failing());
        pipeline.add_processor(after.clone());

        let entry = file_entry(&tmp, "a.txt", b"hello");
        let key = entry.full_path();
        let outcome = pipeline.process_crawled(None, entry);

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].processor, "counting");
        assert_eq!(after.calls(), 1);
        assert_eq!(outcome.status, PathStatus::Persisted);
        let stored = repo.get(&key).unwrap().unwrap();
        assert_eq!(stored.stage, Stage::AttributesExtracted);
        assert_eq!(stored.tags.get("seen").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_panicking_processor_is_reported_as_failure() {
        struct Panicking;

        impl PathProcessor for Panicking {
            fn name(&self) -> &str {
                "panicking"
            }

            fn applicability(&self) -> Applicability {
                Applicability::All
            }

            fn process(&self, _event: Option<&CrawlEvent>, _entry: &mut PathEntry) -> Result<()> {
                panic!("corrupt header");
            }
        }

        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let after = Counting::new(Applicability::All, Some(Stage::AttributesExtracted));
        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(Arc::new(Panicking));
        pipeline.add_processor(after.clone());

        let outcome = pipeline.process_crawled(None, file_entry(&tmp, "a.txt", b"hello"));

        assert_eq!(outcome.status, PathStatus::Persisted);
        assert_eq!(outcome.stage, Stage::AttributesExtracted);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].processor, "panicking");
        assert!(outcome.failures[0].error.message.contains("corrupt header"));
        assert_eq!(after.calls(), 1);
    }

    #[test]
    fn test_vanished_path_becomes_deleted() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(Arc::new(HashProcessor::default()));

        let entry = file_entry(&tmp, "gone.txt", b"data");
        fs::remove_file(&entry.path).unwrap();
        let key = entry.full_path();
        let outcome = pipeline.process_crawled(None, entry);

        assert_eq!(outcome.stage, Stage::PathDeleted);
        assert_eq!(repo.get(&key).unwrap().unwrap().stage, Stage::PathDeleted);
    }

    #[test]
    fn test_unchanged_record_is_not_reprocessed() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let counter = Counting::new(Applicability::All, None);
        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(Arc::new(HashProcessor::default()));
        pipeline.add_processor(counter.clone());

        let entry = file_entry(&tmp, "a.txt", b"hello");
        assert_eq!(
            pipeline.process_crawled(None, entry.clone()).status,
            PathStatus::Persisted
        );
        assert_eq!(
            pipeline.process_crawled(None, entry.clone()).status,
            PathStatus::Unchanged
        );
        assert_eq!(counter.calls(), 1);

        let forced = StagePipeline::new()
            .with_repository(repo.clone())
            .with_force_refresh(true);
        assert_eq!(forced.process_crawled(None, entry).status, PathStatus::Persisted);
    }

    #[test]
    fn test_stage_never_moves_backwards() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let mut entry = file_entry(&tmp, "a.txt", b"hello");
        entry.stage = Stage::Indexed;
        repo.save(&entry).unwrap();

        let pipeline = StagePipeline::new()
            .with_repository(repo.clone())
            .with_force_refresh(true);
        let mut fresh = entry.clone();
        fresh.stage = Stage::Crawled;
        let outcome = pipeline.process_crawled(None, fresh);
        assert_eq!(outcome.stage, Stage::Indexed);
    }

    #[test]
    fn test_empty_entry_policies() {
        let tmp = TempDir::new().unwrap();
        let counter = Counting::new(Applicability::All, None);

        let mut skip = StagePipeline::new().with_persist_empty(PersistEmpty::Skip);
        skip.add_processor(counter.clone());
        let outcome = skip.process_crawled(None, file_entry(&tmp, "empty", b""));
        assert_eq!(outcome.status, PathStatus::SkippedEmpty);

        let repo = repository();
        let mut partial = StagePipeline::new()
            .with_repository(repo.clone())
            .with_persist_empty(PersistEmpty::Partial);
        partial.add_processor(counter.clone());
        let entry = file_entry(&tmp, "empty2", b"");
        let key = entry.full_path();
        assert_eq!(partial.process_crawled(None, entry).status, PathStatus::Persisted);
        assert_eq!(counter.calls(), 0);
        assert_eq!(repo.get(&key).unwrap().unwrap().stage, Stage::Crawled);
    }

    #[test]
    fn test_hash_inherited_from_unchanged_file() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let mut stored = file_entry(&tmp, "a.txt", b"hello");
        stored.hash = Some("abc".into());
        stored.hashes.insert("blake3".into(), "abc".into());
        stored.stage = Stage::HashComputed;
        repo.save(&stored).unwrap();

        let pipeline = StagePipeline::new()
            .with_repository(repo.clone())
            .with_force_refresh(true);
        let mut fresh = stored.clone();
        fresh.hash = None;
        fresh.hashes.clear();
        fresh.stage = Stage::Crawled;
        let outcome = pipeline.process_crawled(None, fresh);

        assert_eq!(outcome.stage, Stage::HashComputed);
        let reloaded = repo.get(&outcome.path).unwrap().unwrap();
        assert_eq!(reloaded.hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_advance_skips_indexed_entries() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        let mut entry = file_entry(&tmp, "a.txt", b"hello");
        entry.stage = Stage::Indexed;
        repo.save(&entry).unwrap();
        let before = repo.get(&entry.full_path()).unwrap().unwrap();

        let counter = Counting::new(Applicability::All, Some(Stage::Indexed));
        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(counter.clone());
        let report = StageAdvancer::new(Arc::new(pipeline))
            .advance(PathKind::File, Stage::Indexed)
            .unwrap();

        assert_eq!(counter.calls(), 0);
        assert_eq!(report.examined, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(repo.get(&entry.full_path()).unwrap().unwrap(), before);
    }

    #[test]
    fn test_advance_hashes_crawled_entries_in_batches() {
        let tmp = TempDir::new().unwrap();
        let repo = repository();
        for i in 0..5 {
            let entry = file_entry(&tmp, &format!("f{}.txt", i), format!("content {}", i).as_bytes());
            repo.save(&entry).unwrap();
        }
        let gone = file_entry(&tmp, "gone.txt", b"bye");
        repo.save(&gone).unwrap();
        fs::remove_file(&gone.path).unwrap();

        let mut pipeline = StagePipeline::new().with_repository(repo.clone());
        pipeline.add_processor(Arc::new(HashProcessor::default()));
        let report = StageAdvancer::new(Arc::new(pipeline))
            .with_batch_size(2)
            .advance(PathKind::File, Stage::Crawled)
            .unwrap();

        assert_eq!(report.examined, 6);
        assert_eq!(report.advanced, 5);
        assert_eq!(report.deleted, 1);
        assert!(repo
            .find_by_stage(PathKind::File, Stage::Crawled, 100)
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.find_by_stage(PathKind::File, Stage::HashComputed, 100)
                .unwrap()
                .len(),
            5
        );
    }

    #[test]
    fn test_advance_requires_repository() {
        let advancer = StageAdvancer::new(Arc::new(StagePipeline::new()));
        assert!(advancer.advance(PathKind::File, Stage::Crawled).is_err());
    }
}
