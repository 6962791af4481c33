//! Directory walker, the producer side of a crawl
//!
//! Walks each registered root on the calling thread with an explicit work
//! stack, consults the filter chain and emits lifecycle events. A directory's
//! `DirectoryCrawled` event is emitted only after all of its descendants have
//! been visited, carrying the aggregated size and file count of the files
//! reported below it.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

use crate::config::{RootSpec, DEFAULT_PROGRESS_EVERY};
use crate::error::{CrawlError, Result};
use crate::events::{CrawlEvent, CrawlObserver, EventBus, EventKind, Flow};
use crate::filters::{Candidate, FilterChain, Verdict};
use crate::models::{normalize_path, PathEntry, PathKind, RunSnapshot};

/// Length of the recent found/skipped/crawled path lists
pub const RECENT_PATHS: usize = 2000;

/// Counters and recent-path lists of a walk, owned by the walker thread
#[derive(Debug, Default)]
pub struct RunStats {
    snapshot: RunSnapshot,
    recent_found: VecDeque<String>,
    recent_skipped: VecDeque<String>,
    recent_crawled: VecDeque<String>,
    errored: BTreeMap<String, String>,
}

fn remember(list: &mut VecDeque<String>, path: &Path) {
    if list.len() == RECENT_PATHS {
        list.pop_front();
    }
    list.push_back(normalize_path(path));
}

impl RunStats {
    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn recent_found(&self) -> impl Iterator<Item = &str> {
        self.recent_found.iter().map(String::as_str)
    }

    pub fn recent_skipped(&self) -> impl Iterator<Item = &str> {
        self.recent_skipped.iter().map(String::as_str)
    }

    pub fn recent_crawled(&self) -> impl Iterator<Item = &str> {
        self.recent_crawled.iter().map(String::as_str)
    }

    /// Paths that failed, with the error message
    pub fn errored(&self) -> &BTreeMap<String, String> {
        &self.errored
    }

    fn start(&mut self) {
        self.snapshot.started_at = Some(Utc::now());
        self.snapshot.ended_at = None;
    }

    fn finish(&mut self) {
        self.snapshot.ended_at = Some(Utc::now());
    }

    fn found(&mut self, path: &Path) {
        self.snapshot.paths_found += 1;
        remember(&mut self.recent_found, path);
    }

    fn skipped(&mut self, path: &Path, kind: PathKind) {
        self.snapshot.paths_skipped += 1;
        match kind {
            PathKind::File => self.snapshot.files_skipped += 1,
            PathKind::Directory => self.snapshot.directories_skipped += 1,
        }
        remember(&mut self.recent_skipped, path);
    }

    fn crawled(&mut self, path: &Path, kind: PathKind, size: u64) {
        match kind {
            PathKind::File => {
                self.snapshot.files_crawled += 1;
                self.snapshot.bytes_processed += size;
            }
            PathKind::Directory => self.snapshot.directories_crawled += 1,
        }
        remember(&mut self.recent_crawled, path);
    }

    fn errored_path(&mut self, path: &Path, message: &str) {
        self.snapshot.errors += 1;
        if self.errored.len() < RECENT_PATHS {
            self.errored.insert(normalize_path(path), message.to_string());
        }
    }
}

/// Outcome of a walk
#[derive(Debug, Clone)]
pub struct WalkReport {
    pub run: RunSnapshot,
    /// The walk ended because a stop was requested
    pub stopped: bool,
}

struct Root {
    path: PathBuf,
    prefix: String,
    spec: RootSpec,
}

enum Work {
    Enter(DirEntry, usize),
    Exit,
}

/// A directory whose descendants are still being visited
struct OpenDir {
    entry: PathEntry,
    size: u64,
    files: u64,
    file_names: Vec<String>,
    notify: bool,
}

/// Recursive, single-threaded producer of crawl events
pub struct Walker {
    filters: FilterChain,
    bus: EventBus,
    roots: Vec<Root>,
    crawled: Vec<PathBuf>,
    stats: RunStats,
    progress_every: u64,
    stop: Arc<AtomicBool>,
}

impl Walker {
    pub fn new(filters: FilterChain) -> Self {
        Self {
            filters,
            bus: EventBus::new(),
            roots: Vec::new(),
            crawled: Vec::new(),
            stats: RunStats::default(),
            progress_every: DEFAULT_PROGRESS_EVERY,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit a progress event every `every` found paths (0 disables)
    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Share a stop flag with the caller
    pub fn with_stop_handle(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn subscribe(&mut self, observer: Arc<dyn CrawlObserver>) -> bool {
        self.bus.subscribe(observer)
    }

    /// Flag checked between notifications; setting it stops the walk
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Roots registered and not crawled yet
    pub fn roots(&self) -> Vec<&Path> {
        self.roots.iter().map(|r| r.path.as_path()).collect()
    }

    /// Register a root to crawl
    ///
    /// The base directory is resolved to an absolute, symlink-free path.
    /// Returns `Ok(false)` when it overlaps a root registered or crawled before.
    pub fn add_root(&mut self, spec: RootSpec) -> Result<bool> {
        let path = std::fs::canonicalize(&spec.base_dir).map_err(|e| {
            CrawlError::invalid_root(spec.base_dir.clone(), format!("Unable to resolve root: {}", e))
        })?;
        if !path.is_dir() {
            return Err(CrawlError::invalid_root(path, "Root is not a directory"));
        }

        let overlapping = self
            .roots
            .iter()
            .map(|r| &r.path)
            .chain(self.crawled.iter())
            .find(|known| path.starts_with(known) || known.starts_with(&path));
        if let Some(known) = overlapping {
            log::warn!("Ignoring root {:?}: overlaps {:?}", path, known);
            return Ok(false);
        }

        let prefix = spec
            .virtual_root
            .clone()
            .unwrap_or_else(|| normalize_path(&path));
        log::debug!("Registered root {:?} (virtual root {})", path, prefix);
        self.roots.push(Root { path, prefix, spec });
        Ok(true)
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn emit(&mut self, kind: EventKind) -> Flow {
        let mut event = CrawlEvent::new(kind, self.stats.snapshot.clone());
        event.should_stop = self.stop_requested();
        let flow = self.bus.publish(&mut event);
        if flow == Flow::Stop && !self.stop.swap(true, Ordering::SeqCst) {
            log::info!("Stop requested, finishing the walk");
        }
        flow
    }

    /// Crawl every registered root in registration order
    pub fn run(&mut self) -> WalkReport {
        let roots = std::mem::take(&mut self.roots);
        self.stats.start();
        self.emit(EventKind::CrawlStarting {
            roots: roots.iter().map(|r| r.path.clone()).collect(),
        });

        for root in &roots {
            if self.stop_requested() {
                break;
            }
            log::info!("Crawling {:?}", root.path);
            self.crawl_root(root);
            self.crawled.push(root.path.clone());
        }

        self.stats.finish();
        let stopped = self.stop_requested();
        let run = self.stats.snapshot.clone();
        log::info!(
            "Walk {}: {} found, {} skipped, {} files and {} directories crawled, {} errors",
            if stopped { "stopped" } else { "completed" },
            run.paths_found,
            run.paths_skipped,
            run.files_crawled,
            run.directories_crawled,
            run.errors
        );
        self.emit(if stopped {
            EventKind::CrawlStopped
        } else {
            EventKind::CrawlCompleted
        });
        WalkReport { run, stopped }
    }

    fn crawl_root(&mut self, root: &Root) {
        let first = match WalkDir::new(&root.path).max_depth(0).into_iter().next() {
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                self.record_error(&root.path, e.into());
                return;
            }
            None => return,
        };

        let mut stack = vec![Work::Enter(first, 0)];
        let mut open: Vec<OpenDir> = Vec::new();
        while let Some(work) = stack.pop() {
            if self.stop_requested() {
                break;
            }
            match work {
                Work::Enter(entry, depth) => self.visit(root, entry, depth, &mut stack, &mut open),
                Work::Exit => self.close_dir(&mut open),
            }
        }
    }

    fn visit(
        &mut self,
        root: &Root,
        dir_entry: DirEntry,
        depth: usize,
        stack: &mut Vec<Work>,
        open: &mut Vec<OpenDir>,
    ) {
        let path = dir_entry.path().to_path_buf();
        let file_type = dir_entry.file_type();
        let kind = if file_type.is_dir() {
            PathKind::Directory
        } else if file_type.is_file() {
            PathKind::File
        } else {
            log::debug!("Ignoring {:?}: not a regular file or directory", path);
            return;
        };
        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                self.record_error(&path, e.into());
                return;
            }
        };

        self.stats.found(&path);
        let entry = entry_for(root, &path, kind, &metadata);
        self.emit(EventKind::PathFound {
            entry: entry.clone(),
        });
        if self.progress_every > 0 && self.stats.snapshot.paths_found % self.progress_every == 0 {
            self.emit(EventKind::CrawlProgress);
        }
        if self.stop_requested() {
            return;
        }

        let name = entry.name.clone();
        let candidate = Candidate::new(&path, &name, kind, depth);
        if let Verdict::Denied(filter) = self.filters.evaluate(&candidate, Some(&metadata)) {
            log::debug!("Skipping {:?}: denied by {}", path, filter);
            self.stats.skipped(&path, kind);
            self.emit(EventKind::PathSkipped { entry, filter });
            return;
        }
        let notify = self.filters.should_notify(&candidate, Some(&metadata));

        match kind {
            PathKind::File => {
                let size = metadata.len();
                self.stats.snapshot.bytes_crawled += size;
                self.emit(EventKind::FileFound {
                    entry: entry.clone(),
                });
                if !notify || self.stop_requested() {
                    return;
                }
                if let Some(parent) = open.last_mut() {
                    parent.size += size;
                    parent.files += 1;
                }
                self.stats.crawled(&path, kind, size);
                self.emit(EventKind::FileCrawled { entry });
            }
            PathKind::Directory => {
                self.emit(EventKind::DirectoryFound {
                    entry: entry.clone(),
                });
                if self.stop_requested() {
                    return;
                }
                let children = self.list_children(&path);
                let file_names = children
                    .iter()
                    .filter(|c| !c.file_type().is_dir())
                    .map(|c| c.file_name().to_string_lossy().to_string())
                    .collect();
                open.push(OpenDir {
                    entry,
                    size: 0,
                    files: 0,
                    file_names,
                    notify,
                });
                stack.push(Work::Exit);
                stack.extend(children.into_iter().rev().map(|c| Work::Enter(c, depth + 1)));
            }
        }
    }

    fn list_children(&mut self, dir: &Path) -> Vec<DirEntry> {
        let mut children = Vec::new();
        for child in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            match child {
                Ok(child) => children.push(child),
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| dir.to_path_buf());
                    self.record_error(&path, e.into());
                }
            }
        }
        children
    }

    fn close_dir(&mut self, open: &mut Vec<OpenDir>) {
        let Some(dir) = open.pop() else {
            return;
        };
        if let Some(parent) = open.last_mut() {
            parent.size += dir.size;
            parent.files += dir.files;
        }
        if !dir.notify {
            return;
        }

        let mut entry = dir.entry;
        entry.size = Some(dir.size);
        entry.files_in_dir = Some(dir.files);
        self.stats.crawled(&entry.path, PathKind::Directory, dir.size);
        self.emit(EventKind::DirectoryCrawled {
            entry,
            file_names: dir.file_names,
        });
    }

    /// Log a per-entry failure; entries that vanished mid-walk are not errors
    fn record_error(&mut self, path: &Path, error: CrawlError) {
        if error.is_not_found() {
            log::debug!("Skipping {:?}: no longer exists", path);
            return;
        }
        log::warn!("Unable to crawl {:?}: {}", path, error.message);
        self.stats.errored_path(path, &error.message);
        self.emit(EventKind::CrawlError {
            path: Some(path.to_path_buf()),
            message: error.message,
        });
    }
}

fn entry_for(root: &Root, path: &Path, kind: PathKind, metadata: &Metadata) -> PathEntry {
    let mut entry = match kind {
        PathKind::File => PathEntry::file(path.to_path_buf(), &root.prefix, Some(metadata.len())),
        PathKind::Directory => PathEntry::pending_directory(path.to_path_buf(), &root.prefix),
    };
    entry.classification = root.spec.classification;
    entry.target_table = root.spec.target_table.clone();
    entry.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    entry.created = metadata.created().ok().map(DateTime::<Utc>::from);
    entry.flags.hidden = entry.name.starts_with('.');
    entry
}
