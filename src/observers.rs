//! Built-in crawl observers

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{CrawlError, Result};
use crate::events::{CrawlEvent, CrawlObserver, EventKind, Flow};
use crate::models::PathEntry;

/// Entries kept per ranking (deepest, longest, biggest)
const TOP_N: usize = 10;

/// Paths at least this long are reported as too long
pub const PATH_TOO_LONG: usize = 255;

/// File names that do not make a directory worth keeping
pub const JUNK_FILE_NAMES: [&str; 8] = [
    ".DS_Store",
    "._.DS_Store",
    "Thumbs.db",
    "thumbs.db",
    "Desktop.ini",
    "desktop.ini",
    "@easyno",
    "ehthumbs.db",
];

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CrawlError::observer_error("observer state lock poisoned"))
}

/// Logs every lifecycle event at a fixed level
pub struct LoggingObserver {
    level: log::Level,
}

impl LoggingObserver {
    pub fn new(level: log::Level) -> Self {
        Self { level }
    }
}

impl Default for LoggingObserver {
    fn default() -> Self {
        Self::new(log::Level::Debug)
    }
}

impl CrawlObserver for LoggingObserver {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow> {
        match &event.kind {
            EventKind::CrawlStarting { roots } => {
                log::log!(self.level, "Crawl starting on {:?}", roots)
            }
            EventKind::PathSkipped { entry, filter } => {
                log::log!(self.level, "Skipped {} (denied by {})", entry.full_path(), filter)
            }
            EventKind::CrawlProgress => log::log!(
                self.level,
                "Progress: {} found, {} crawled, {} skipped",
                event.run.paths_found,
                event.run.paths_processed(),
                event.run.paths_skipped
            ),
            EventKind::CrawlError { path, message } => {
                log::warn!("Crawl error on {:?}: {}", path, message)
            }
            EventKind::CrawlStopped | EventKind::CrawlCompleted => log::info!(
                "{}: {} found, {} crawled, {} skipped, {} bytes in {} ms",
                event.name(),
                event.run.paths_found,
                event.run.paths_processed(),
                event.run.paths_skipped,
                event.run.bytes_processed,
                event.run.duration_ms().unwrap_or(0)
            ),
            _ => {
                if let Some(entry) = event.entry() {
                    log::log!(self.level, "{}: {}", event.name(), entry.full_path());
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Aggregated crawl statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsReport {
    pub extensions_found: BTreeSet<String>,
    pub extensions_crawled: BTreeSet<String>,
    /// Depth to paths, deepest first
    pub deepest_paths: Vec<(usize, Vec<String>)>,
    /// Aggregated size to directory, biggest first
    pub biggest_directories: Vec<(u64, String)>,
    /// Path length to path, longest first
    pub longest_paths: Vec<(usize, String)>,
    pub empty_directories: Vec<String>,
    pub skipped_files_size: u64,
}

impl MetricsReport {
    /// Extensions found but never reported as crawled
    pub fn extensions_ignored(&self) -> BTreeSet<String> {
        self.extensions_found
            .difference(&self.extensions_crawled)
            .cloned()
            .collect()
    }

    /// Paths at or above the usual filesystem limit
    pub fn paths_too_long(&self) -> Vec<&(usize, String)> {
        self.longest_paths
            .iter()
            .filter(|(len, _)| *len >= PATH_TOO_LONG)
            .collect()
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    extensions_found: BTreeSet<String>,
    extensions_crawled: BTreeSet<String>,
    depths: BTreeMap<usize, Vec<String>>,
    directory_sizes: BTreeMap<u64, String>,
    lengths: BTreeMap<usize, String>,
    empty_directories: Vec<String>,
    skipped_files_size: u64,
}

/// Keep only the `TOP_N` greatest keys
fn keep_top<K: Ord, V>(map: &mut BTreeMap<K, V>) {
    while map.len() > TOP_N {
        map.pop_first();
    }
}

fn found_extension(entry: &PathEntry) -> String {
    match &entry.extension {
        Some(ext) => ext.clone(),
        None => entry.name.to_lowercase(),
    }
}

/// Collects extension histograms, deepest and longest paths, biggest and empty directories
#[derive(Debug, Default)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> Result<MetricsReport> {
        let state = lock(&self.state)?;
        Ok(MetricsReport {
            extensions_found: state.extensions_found.clone(),
            extensions_crawled: state.extensions_crawled.clone(),
            deepest_paths: state
                .depths
                .iter()
                .rev()
                .map(|(d, paths)| (*d, paths.clone()))
                .collect(),
            biggest_directories: state
                .directory_sizes
                .iter()
                .rev()
                .map(|(s, p)| (*s, p.clone()))
                .collect(),
            longest_paths: state
                .lengths
                .iter()
                .rev()
                .map(|(l, p)| (*l, p.clone()))
                .collect(),
            empty_directories: state.empty_directories.clone(),
            skipped_files_size: state.skipped_files_size,
        })
    }

    fn log_statistics(&self) -> Result<()> {
        let report = self.report()?;
        log::info!(
            "File extensions found ({}): {}",
            report.extensions_found.len(),
            report.extensions_found.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        let ignored = report.extensions_ignored();
        log::info!(
            "File extensions ignored ({}): {}",
            ignored.len(),
            ignored.into_iter().collect::<Vec<_>>().join(", ")
        );
        log::info!("Total size of skipped files: {} bytes", report.skipped_files_size);
        for (depth, paths) in &report.deepest_paths {
            if let Some(example) = paths.first() {
                log::info!("Depth {} ({} items), e.g. {}", depth, paths.len(), example);
            }
        }
        for (size, path) in &report.biggest_directories {
            log::info!("Directory {} bytes: {}", size, path);
        }
        if !report.empty_directories.is_empty() {
            log::info!("{} empty directories", report.empty_directories.len());
        }
        for (len, path) in report.paths_too_long() {
            log::warn!("Path too long ({} chars): {}", len, path);
        }
        Ok(())
    }
}

impl CrawlObserver for MetricsCollector {
    fn name(&self) -> &str {
        "metrics"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow> {
        match &event.kind {
            EventKind::PathFound { entry } => {
                let full_path = entry.full_path();
                let depth = entry.path.components().count().saturating_sub(1);
                let mut state = lock(&self.state)?;
                if entry.is_file() {
                    state.extensions_found.insert(found_extension(entry));
                }
                let paths = state.depths.entry(depth).or_default();
                if paths.len() < TOP_N && !paths.contains(&full_path) {
                    paths.push(full_path.clone());
                }
                keep_top(&mut state.depths);
                state.lengths.entry(full_path.chars().count()).or_insert(full_path);
                keep_top(&mut state.lengths);
            }
            EventKind::PathSkipped { entry, .. } if entry.is_file() => {
                lock(&self.state)?.skipped_files_size += entry.size.unwrap_or(0);
            }
            EventKind::FileCrawled { entry } => {
                if let Some(ext) = &entry.extension {
                    lock(&self.state)?.extensions_crawled.insert(ext.clone());
                }
            }
            EventKind::DirectoryCrawled { entry, .. } => {
                let size = entry.size.unwrap_or(0);
                let mut state = lock(&self.state)?;
                state.directory_sizes.insert(size, entry.full_path());
                keep_top(&mut state.directory_sizes);
                if entry.is_empty() {
                    state.empty_directories.push(entry.full_path());
                }
            }
            EventKind::CrawlStopped | EventKind::CrawlCompleted => self.log_statistics()?,
            _ => {}
        }
        Ok(Flow::Continue)
    }
}

/// Whether a crawled directory holds nothing worth keeping
pub fn is_empty_directory(entry: &PathEntry, file_names: &[String]) -> bool {
    if entry.is_empty() {
        return true;
    }
    !file_names.is_empty()
        && entry.files_in_dir.unwrap_or(0) as usize <= file_names.len()
        && file_names
            .iter()
            .all(|name| JUNK_FILE_NAMES.contains(&name.as_str()))
}

/// Records directories that are empty or hold only OS junk files
#[derive(Debug, Default)]
pub struct EmptyDirectoryObserver {
    directories: Mutex<Vec<String>>,
}

impl EmptyDirectoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty_directories(&self) -> Result<Vec<String>> {
        Ok(lock(&self.directories)?.clone())
    }

    pub fn count(&self) -> usize {
        self.directories.lock().map(|d| d.len()).unwrap_or(0)
    }
}

impl CrawlObserver for EmptyDirectoryObserver {
    fn name(&self) -> &str {
        "empty_directories"
    }

    fn on_event(&self, event: &CrawlEvent) -> Result<Flow> {
        if let EventKind::DirectoryCrawled { entry, file_names } = &event.kind {
            if is_empty_directory(entry, file_names) {
                log::debug!("Empty directory: {}", entry.full_path());
                lock(&self.directories)?.push(entry.full_path());
            }
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunSnapshot;
    use std::path::PathBuf;

    fn event(kind: EventKind) -> CrawlEvent {
        CrawlEvent::new(kind, RunSnapshot::default())
    }

    fn dir_crawled(path: &str, size: u64, files: u64, names: &[&str]) -> CrawlEvent {
        event(EventKind::DirectoryCrawled {
            entry: PathEntry::directory(PathBuf::from(path), "", size, files),
            file_names: names.iter().map(|n| n.to_string()).collect(),
        })
    }

    #[test]
    fn test_empty_directory_detection() {
        let observer = EmptyDirectoryObserver::new();
        observer.on_event(&dir_crawled("/d/empty", 0, 0, &[])).unwrap();
        observer
            .on_event(&dir_crawled("/d/junk", 6148, 1, &[".DS_Store"]))
            .unwrap();
        observer
            .on_event(&dir_crawled("/d/full", 100, 2, &["a.txt", "Thumbs.db"]))
            .unwrap();
        observer
            .on_event(&dir_crawled("/d/nested", 200, 3, &["Thumbs.db"]))
            .unwrap();

        assert_eq!(observer.empty_directories().unwrap(), vec!["/d/empty", "/d/junk"]);
        assert_eq!(observer.count(), 2);
    }

    #[test]
    fn test_metrics_extensions_and_skipped_size() {
        let metrics = MetricsCollector::new();
        let a = PathEntry::file(PathBuf::from("/d/a.txt"), "/d", Some(10));
        let b = PathEntry::file(PathBuf::from("/d/c.tmp"), "/d", Some(7));
        let readme = PathEntry::file(PathBuf::from("/d/README"), "/d", Some(1));

        metrics.on_event(&event(EventKind::PathFound { entry: a.clone() })).unwrap();
        metrics.on_event(&event(EventKind::PathFound { entry: b.clone() })).unwrap();
        metrics.on_event(&event(EventKind::PathFound { entry: readme })).unwrap();
        metrics
            .on_event(&event(EventKind::PathSkipped {
                entry: b,
                filter: "extension",
            }))
            .unwrap();
        metrics.on_event(&event(EventKind::FileCrawled { entry: a })).unwrap();

        let report = metrics.report().unwrap();
        assert_eq!(
            report.extensions_found.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["readme", "tmp", "txt"]
        );
        assert_eq!(
            report.extensions_ignored().into_iter().collect::<Vec<_>>(),
            vec!["readme", "tmp"]
        );
        assert_eq!(report.skipped_files_size, 7);
    }

    #[test]
    fn test_metrics_rankings_keep_top_entries() {
        let metrics = MetricsCollector::new();
        for i in 0..(TOP_N as u64 + 5) {
            metrics
                .on_event(&dir_crawled(&format!("/d/{}", i), i * 10, i.min(1), &[]))
                .unwrap();
        }
        let long = format!("/d/{}", "x".repeat(PATH_TOO_LONG));
        metrics
            .on_event(&event(EventKind::PathFound {
                entry: PathEntry::file(PathBuf::from(&long), "", Some(1)),
            }))
            .unwrap();

        let report = metrics.report().unwrap();
        assert_eq!(report.biggest_directories.len(), TOP_N);
        assert_eq!(report.biggest_directories[0], (140, "/d/14".to_string()));
        assert_eq!(report.empty_directories, vec!["/d/0"]);
        assert_eq!(report.paths_too_long().len(), 1);
        assert_eq!(report.deepest_paths[0].0, 2);
    }
}
