//! Path filters and the filter chain consulted by the walker
//!
//! Skip filters are AND-ed: a candidate is authorized only when every skip
//! filter authorizes it, and a denied directory is pruned with its whole
//! subtree. Notify filters are OR-ed and only decide whether an authorized
//! candidate gets reported; they never affect traversal.
//!
//! Allow-lists (authorized extensions, names and patterns, size and date
//! ranges) only judge files so that directories stay traversable. Deny-lists
//! and the depth cap judge files and directories alike.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{normalize_path, PathKind};

/// A path presented to filters, before any event is emitted for it
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub path: &'a Path,
    pub name: &'a str,
    pub kind: PathKind,
    /// Depth below the crawled root (the root itself is 0)
    pub depth: usize,
}

impl<'a> Candidate<'a> {
    pub fn new(path: &'a Path, name: &'a str, kind: PathKind, depth: usize) -> Self {
        Self {
            path,
            name,
            kind,
            depth,
        }
    }

    fn is_file(&self) -> bool {
        self.kind == PathKind::File
    }
}

/// A named predicate over a candidate and its prefetched metadata
pub trait PathFilter: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics ("extension", "name", ...)
    fn name(&self) -> &'static str;

    /// Return false to deny the candidate
    fn authorize(&self, candidate: &Candidate<'_>, metadata: Option<&Metadata>) -> bool;

    /// Identity used to ignore duplicate registrations in a chain
    fn identity(&self) -> String {
        format!("{:?}", self)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Allow or deny files by extension
#[derive(Debug, Clone, Default)]
pub struct ExtensionFilter {
    authorized: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

impl ExtensionFilter {
    pub fn new<I, J, S, T>(authorized: I, excluded: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            authorized: authorized.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
            excluded: excluded.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
        }
    }

    pub fn excluding<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(std::iter::empty::<&str>(), excluded)
    }
}

impl PathFilter for ExtensionFilter {
    fn name(&self) -> &'static str {
        "extension"
    }

    fn authorize(&self, candidate: &Candidate<'_>, _metadata: Option<&Metadata>) -> bool {
        if !candidate.is_file() {
            return true;
        }
        let ext = crate::models::extension_of(candidate.path).unwrap_or_default();
        if !ext.is_empty() && self.excluded.contains(&ext) {
            log::debug!("Skipping {:?}: excluded extension '{}'", candidate.path, ext);
            return false;
        }
        if !self.authorized.is_empty() && !self.authorized.contains(&ext) {
            log::debug!("Skipping {:?}: extension '{}' not authorized", candidate.path, ext);
            return false;
        }
        true
    }
}

/// Allow or deny paths by their exact entry name
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    authorized: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

impl NameFilter {
    pub fn new<I, J, S, T>(authorized: I, excluded: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            authorized: authorized.into_iter().map(Into::into).collect(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluding<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(std::iter::empty::<String>(), excluded)
    }
}

impl PathFilter for NameFilter {
    fn name(&self) -> &'static str {
        "name"
    }

    fn authorize(&self, candidate: &Candidate<'_>, _metadata: Option<&Metadata>) -> bool {
        if self.excluded.contains(candidate.name) {
            log::debug!("Skipping {:?}: excluded name", candidate.path);
            return false;
        }
        if candidate.is_file() && !self.authorized.is_empty() && !self.authorized.contains(candidate.name) {
            log::debug!("Skipping {:?}: name not authorized", candidate.path);
            return false;
        }
        true
    }
}

/// Allow or deny paths matching a glob pattern on the full path
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    authorized: Option<glob::Pattern>,
    excluded: Option<glob::Pattern>,
}

impl GlobFilter {
    pub fn new(authorized: Option<&str>, excluded: Option<&str>) -> Result<Self> {
        Ok(Self {
            authorized: authorized.map(glob::Pattern::new).transpose()?,
            excluded: excluded.map(glob::Pattern::new).transpose()?,
        })
    }
}

impl PathFilter for GlobFilter {
    fn name(&self) -> &'static str {
        "glob"
    }

    fn authorize(&self, candidate: &Candidate<'_>, _metadata: Option<&Metadata>) -> bool {
        if let Some(pattern) = &self.excluded {
            if pattern.matches_path(candidate.path) {
                log::debug!("Skipping {:?}: excluded by pattern {}", candidate.path, pattern);
                return false;
            }
        }
        if let Some(pattern) = &self.authorized {
            if candidate.is_file() && !pattern.matches_path(candidate.path) {
                log::debug!("Skipping {:?}: not allowed by pattern {}", candidate.path, pattern);
                return false;
            }
        }
        true
    }
}

/// Allow or deny paths matching a regex anywhere in the full path
#[derive(Debug, Clone, Default)]
pub struct RegexFilter {
    authorized: Option<Regex>,
    excluded: Option<Regex>,
}

impl RegexFilter {
    pub fn new(authorized: Option<&str>, excluded: Option<&str>, ignore_case: bool) -> Result<Self> {
        let compile = |pattern: &str| -> Result<Regex> {
            Ok(RegexBuilder::new(pattern).case_insensitive(ignore_case).build()?)
        };
        Ok(Self {
            authorized: authorized.map(compile).transpose()?,
            excluded: excluded.map(compile).transpose()?,
        })
    }
}

impl PathFilter for RegexFilter {
    fn name(&self) -> &'static str {
        "regex"
    }

    fn authorize(&self, candidate: &Candidate<'_>, _metadata: Option<&Metadata>) -> bool {
        let path = normalize_path(candidate.path);
        if let Some(re) = &self.excluded {
            if re.is_match(&path) {
                log::debug!("Skipping {}: excluded by regex {}", path, re);
                return false;
            }
        }
        if let Some(re) = &self.authorized {
            if candidate.is_file() && !re.is_match(&path) {
                log::debug!("Skipping {}: not allowed by regex {}", path, re);
                return false;
            }
        }
        true
    }
}

/// Keep files whose size lies in `[min, max]`
#[derive(Debug, Clone)]
pub struct SizeFilter {
    min: u64,
    max: u64,
}

impl SizeFilter {
    pub fn new(min: Option<u64>, max: Option<u64>) -> Self {
        Self {
            min: min.unwrap_or(0),
            max: max.unwrap_or(u64::MAX),
        }
    }
}

impl PathFilter for SizeFilter {
    fn name(&self) -> &'static str {
        "size"
    }

    fn authorize(&self, candidate: &Candidate<'_>, metadata: Option<&Metadata>) -> bool {
        if !candidate.is_file() {
            return true;
        }
        let Some(metadata) = metadata else {
            log::debug!("Skipping {:?}: no metadata to check size", candidate.path);
            return false;
        };
        let size = metadata.len();
        let authorized = self.min <= size && size <= self.max;
        if !authorized {
            log::debug!(
                "Skipping {:?}: size {} outside [{}, {}]",
                candidate.path,
                size,
                self.min,
                self.max
            );
        }
        authorized
    }
}

/// Timestamp field a `DateFilter` reads from metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampField {
    Modified,
    Accessed,
    Created,
}

impl TimestampField {
    fn read(&self, metadata: &Metadata) -> Option<DateTime<Utc>> {
        let time = match self {
            TimestampField::Modified => metadata.modified(),
            TimestampField::Accessed => metadata.accessed(),
            TimestampField::Created => metadata.created(),
        };
        time.ok().map(DateTime::<Utc>::from)
    }
}

/// Keep files whose selected timestamp lies in `[min, max]`
#[derive(Debug, Clone)]
pub struct DateFilter {
    field: TimestampField,
    min: Option<DateTime<Utc>>,
    max: Option<DateTime<Utc>>,
}

impl DateFilter {
    pub fn new(field: TimestampField, min: Option<DateTime<Utc>>, max: Option<DateTime<Utc>>) -> Self {
        Self { field, min, max }
    }
}

impl PathFilter for DateFilter {
    fn name(&self) -> &'static str {
        "date"
    }

    fn authorize(&self, candidate: &Candidate<'_>, metadata: Option<&Metadata>) -> bool {
        if !candidate.is_file() {
            return true;
        }
        // Entries without the requested timestamp cannot be judged
        let Some(value) = metadata.and_then(|m| self.field.read(m)) else {
            return true;
        };
        if self.min.is_some_and(|min| value < min) {
            log::debug!("Skipping {:?}: {:?} before {:?}", candidate.path, value, self.min);
            return false;
        }
        if self.max.is_some_and(|max| value > max) {
            log::debug!("Skipping {:?}: {:?} after {:?}", candidate.path, value, self.max);
            return false;
        }
        true
    }
}

/// Deny paths deeper than `max_depth` below a root
///
/// Without an explicit root the depth below the crawled root is used.
/// A `max_depth` of 0 disables the cap.
#[derive(Debug, Clone)]
pub struct DepthFilter {
    max_depth: usize,
    root: Option<PathBuf>,
}

impl DepthFilter {
    pub fn new(max_depth: usize, root: Option<PathBuf>) -> Self {
        Self { max_depth, root }
    }

    fn depth_of(&self, candidate: &Candidate<'_>) -> Option<usize> {
        match &self.root {
            Some(root) => candidate
                .path
                .strip_prefix(root)
                .ok()
                .map(|rel| rel.components().count()),
            None => Some(candidate.depth),
        }
    }
}

impl PathFilter for DepthFilter {
    fn name(&self) -> &'static str {
        "depth"
    }

    fn authorize(&self, candidate: &Candidate<'_>, _metadata: Option<&Metadata>) -> bool {
        let Some(depth) = self.depth_of(candidate) else {
            return true;
        };
        if self.max_depth > 0 && depth > self.max_depth {
            log::debug!(
                "Skipping {:?}: depth {} above max {}",
                candidate.path,
                depth,
                self.max_depth
            );
            return false;
        }
        true
    }
}

/// Serializable description of a built-in filter and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterSpec {
    Extension {
        #[serde(default)]
        authorized: Vec<String>,
        #[serde(default)]
        excluded: Vec<String>,
    },
    Name {
        #[serde(default)]
        authorized: Vec<String>,
        #[serde(default)]
        excluded: Vec<String>,
    },
    Glob {
        authorized: Option<String>,
        excluded: Option<String>,
    },
    Regex {
        authorized: Option<String>,
        excluded: Option<String>,
        #[serde(default = "default_ignore_case")]
        ignore_case: bool,
    },
    Size {
        min: Option<u64>,
        max: Option<u64>,
    },
    Date {
        field: TimestampField,
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    },
    Depth {
        max_depth: usize,
        root: Option<PathBuf>,
    },
}

fn default_ignore_case() -> bool {
    true
}

impl FilterSpec {
    /// Compile the description into a filter
    pub fn build(&self) -> Result<Box<dyn PathFilter>> {
        let filter: Box<dyn PathFilter> = match self {
            FilterSpec::Extension {
                authorized,
                excluded,
            } => Box::new(ExtensionFilter::new(authorized, excluded)),
            FilterSpec::Name {
                authorized,
                excluded,
            } => Box::new(NameFilter::new(authorized.clone(), excluded.clone())),
            FilterSpec::Glob {
                authorized,
                excluded,
            } => Box::new(GlobFilter::new(authorized.as_deref(), excluded.as_deref())?),
            FilterSpec::Regex {
                authorized,
                excluded,
                ignore_case,
            } => Box::new(RegexFilter::new(
                authorized.as_deref(),
                excluded.as_deref(),
                *ignore_case,
            )?),
            FilterSpec::Size { min, max } => Box::new(SizeFilter::new(*min, *max)),
            FilterSpec::Date { field, min, max } => Box::new(DateFilter::new(*field, *min, *max)),
            FilterSpec::Depth { max_depth, root } => {
                Box::new(DepthFilter::new(*max_depth, root.clone()))
            }
        };
        Ok(filter)
    }
}

/// Outcome of running the skip filters over a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authorized,
    /// Denied by the named filter
    Denied(&'static str),
}

impl Verdict {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Verdict::Authorized)
    }
}

/// Ordered skip filters plus optional notify filters
#[derive(Debug, Default)]
pub struct FilterChain {
    skip: Vec<Box<dyn PathFilter>>,
    notify: Vec<Box<dyn PathFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from configured filter descriptions
    pub fn from_specs(skip: &[FilterSpec], notify: &[FilterSpec]) -> Result<Self> {
        let mut chain = Self::new();
        for spec in skip {
            chain.add_skip_filter(spec.build()?);
        }
        for spec in notify {
            chain.add_notify_filter(spec.build()?);
        }
        Ok(chain)
    }

    /// Register a skip filter; returns false if an identical one is already registered
    pub fn add_skip_filter(&mut self, filter: Box<dyn PathFilter>) -> bool {
        Self::register(&mut self.skip, filter)
    }

    /// Register a notify filter; returns false if an identical one is already registered
    pub fn add_notify_filter(&mut self, filter: Box<dyn PathFilter>) -> bool {
        Self::register(&mut self.notify, filter)
    }

    fn register(filters: &mut Vec<Box<dyn PathFilter>>, filter: Box<dyn PathFilter>) -> bool {
        let identity = filter.identity();
        if filters.iter().any(|f| f.identity() == identity) {
            return false;
        }
        filters.push(filter);
        true
    }

    pub fn skip_filters(&self) -> &[Box<dyn PathFilter>] {
        &self.skip
    }

    pub fn notify_filters(&self) -> &[Box<dyn PathFilter>] {
        &self.notify
    }

    /// Evaluate skip filters in order, stopping at the first denial
    pub fn evaluate(&self, candidate: &Candidate<'_>, metadata: Option<&Metadata>) -> Verdict {
        self.skip
            .iter()
            .find(|f| !f.authorize(candidate, metadata))
            .map(|f| Verdict::Denied(f.name()))
            .unwrap_or(Verdict::Authorized)
    }

    /// Whether an authorized candidate should be reported to observers
    pub fn should_notify(&self, candidate: &Candidate<'_>, metadata: Option<&Metadata>) -> bool {
        self.notify.is_empty() || self.notify.iter().any(|f| f.authorize(candidate, metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    fn file(path: &Path) -> Candidate<'_> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        Candidate::new(path, name, PathKind::File, 1)
    }

    fn dir(path: &Path, depth: usize) -> Candidate<'_> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        Candidate::new(path, name, PathKind::Directory, depth)
    }

    #[test]
    fn test_extension_filter() {
        let filter = ExtensionFilter::excluding([".TMP", "bak"]);
        assert!(!filter.authorize(&file(Path::new("/data/c.tmp")), None));
        assert!(!filter.authorize(&file(Path::new("/data/c.bak")), None));
        assert!(filter.authorize(&file(Path::new("/data/a.txt")), None));
        assert!(filter.authorize(&dir(Path::new("/data/x.tmp"), 1), None));

        let filter = ExtensionFilter::new(["jpg"], std::iter::empty::<&str>());
        assert!(filter.authorize(&file(Path::new("/p/a.JPG")), None));
        assert!(!filter.authorize(&file(Path::new("/p/a.png")), None));
        assert!(!filter.authorize(&file(Path::new("/p/README")), None));
    }

    #[test]
    fn test_name_filter_prunes_directories() {
        let filter = NameFilter::excluding(["node_modules", ".git"]);
        assert!(!filter.authorize(&dir(Path::new("/src/node_modules"), 1), None));
        assert!(!filter.authorize(&file(Path::new("/src/.git")), None));
        assert!(filter.authorize(&dir(Path::new("/src/lib"), 1), None));

        let filter = NameFilter::new(["keep.txt"], Vec::<String>::new());
        assert!(filter.authorize(&dir(Path::new("/src/any"), 1), None));
        assert!(filter.authorize(&file(Path::new("/src/keep.txt")), None));
        assert!(!filter.authorize(&file(Path::new("/src/other.txt")), None));
    }

    #[test]
    fn test_glob_filter() {
        let filter = GlobFilter::new(None, Some("*/TestData/*")).unwrap();
        assert!(!filter.authorize(&file(Path::new("/p/TestData/a.bin")), None));
        assert!(filter.authorize(&file(Path::new("/p/Data/a.bin")), None));

        let filter = GlobFilter::new(Some("*.mp4"), None).unwrap();
        assert!(filter.authorize(&file(Path::new("/v/clip.mp4")), None));
        assert!(!filter.authorize(&file(Path::new("/v/clip.mkv")), None));
        assert!(filter.authorize(&dir(Path::new("/v/sub"), 1), None));

        assert!(GlobFilter::new(Some("[z-a"), None).is_err());
    }

    #[test]
    fn test_regex_filter_ignore_case() {
        let filter = RegexFilter::new(None, Some(r"python[0-9]\.[0-9]"), true).unwrap();
        assert!(!filter.authorize(&dir(Path::new("/usr/lib/Python3.11"), 2), None));
        assert!(filter.authorize(&dir(Path::new("/usr/lib/perl5"), 2), None));

        let filter = RegexFilter::new(None, Some("Backup"), false).unwrap();
        assert!(filter.authorize(&file(Path::new("/x/backup.zip")), None));
        assert!(RegexFilter::new(Some("("), None, true).is_err());
    }

    #[test]
    fn test_size_filter_uses_metadata() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ten.bin");
        fs::write(&path, [0u8; 10]).unwrap();
        let meta = fs::metadata(&path).unwrap();

        assert!(SizeFilter::new(Some(5), Some(10)).authorize(&file(&path), Some(&meta)));
        assert!(!SizeFilter::new(Some(11), None).authorize(&file(&path), Some(&meta)));
        assert!(!SizeFilter::new(None, Some(9)).authorize(&file(&path), Some(&meta)));
        assert!(!SizeFilter::new(None, None).authorize(&file(&path), None));
    }

    #[test]
    fn test_date_filter() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("recent.txt");
        fs::write(&path, b"x").unwrap();
        let meta = fs::metadata(&path).unwrap();
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let tomorrow = Utc::now() + chrono::Duration::days(1);

        let recent = DateFilter::new(TimestampField::Modified, Some(yesterday), None);
        assert!(recent.authorize(&file(&path), Some(&meta)));
        let old = DateFilter::new(TimestampField::Modified, None, Some(yesterday));
        assert!(!old.authorize(&file(&path), Some(&meta)));
        let future = DateFilter::new(TimestampField::Modified, Some(tomorrow), None);
        assert!(!future.authorize(&file(&path), Some(&meta)));
    }

    #[test]
    fn test_depth_filter() {
        let filter = DepthFilter::new(2, None);
        assert!(filter.authorize(&dir(Path::new("/r/a/b"), 2), None));
        assert!(!filter.authorize(&dir(Path::new("/r/a/b/c"), 3), None));

        let filter = DepthFilter::new(1, Some(PathBuf::from("/r")));
        assert!(filter.authorize(&dir(Path::new("/r/a"), 9), None));
        assert!(!filter.authorize(&dir(Path::new("/r/a/b"), 0), None));
        assert!(filter.authorize(&dir(Path::new("/elsewhere/a/b"), 0), None));

        assert!(DepthFilter::new(0, None).authorize(&dir(Path::new("/r"), 100), None));
    }

    #[test]
    fn test_chain_records_denying_filter() {
        let mut chain = FilterChain::new();
        chain.add_skip_filter(Box::new(NameFilter::excluding(["skip.txt"])));
        chain.add_skip_filter(Box::new(ExtensionFilter::excluding(["tmp"])));

        let verdict = chain.evaluate(&file(Path::new("/d/c.tmp")), None);
        assert_eq!(verdict, Verdict::Denied("extension"));
        let verdict = chain.evaluate(&file(Path::new("/d/skip.txt")), None);
        assert_eq!(verdict, Verdict::Denied("name"));
        assert!(chain.evaluate(&file(Path::new("/d/ok.txt")), None).is_authorized());
    }

    #[test]
    fn test_chain_ignores_duplicate_registration() {
        let mut chain = FilterChain::new();
        assert!(chain.add_skip_filter(Box::new(ExtensionFilter::excluding(["tmp", "bak"]))));
        assert!(!chain.add_skip_filter(Box::new(ExtensionFilter::excluding(["bak", "tmp"]))));
        assert!(chain.add_skip_filter(Box::new(ExtensionFilter::excluding(["log"]))));
        assert_eq!(chain.skip_filters().len(), 2);
    }

    #[test]
    fn test_notify_filters_are_or() {
        let mut chain = FilterChain::new();
        assert!(chain.should_notify(&file(Path::new("/d/a.txt")), None));

        chain.add_notify_filter(Box::new(ExtensionFilter::new(["mp4"], Vec::<String>::new())));
        chain.add_notify_filter(Box::new(ExtensionFilter::new(["jpg"], Vec::<String>::new())));
        assert!(chain.should_notify(&file(Path::new("/d/a.jpg")), None));
        assert!(chain.should_notify(&file(Path::new("/d/a.mp4")), None));
        assert!(!chain.should_notify(&file(Path::new("/d/a.txt")), None));
        // Notify filters never prune traversal
        assert!(chain.evaluate(&file(Path::new("/d/a.txt")), None).is_authorized());
    }

    #[test]
    fn test_filter_spec_from_toml() {
        #[derive(Deserialize)]
        struct Filters {
            filters: Vec<FilterSpec>,
        }

        let parsed: Filters = toml::from_str(
            r#"
            filters = [
                { type = "extension", excluded = ["tmp"] },
                { type = "regex", excluded = "cache" },
                { type = "depth", max_depth = 4 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.filters.len(), 3);
        let chain = FilterChain::from_specs(&parsed.filters, &[]).unwrap();
        assert_eq!(chain.skip_filters().len(), 3);
        assert_eq!(chain.skip_filters()[1].name(), "regex");
    }

    proptest! {
        #[test]
        fn prop_chain_is_and_of_filters(min in 0u64..100, span in 0u64..100, excluded in proptest::bool::ANY) {
            let tmp = tempdir().unwrap();
            let path = tmp.path().join("f.dat");
            fs::write(&path, vec![0u8; 50]).unwrap();
            let meta = fs::metadata(&path).unwrap();

            let size = SizeFilter::new(Some(min), Some(min + span));
            let ext = if excluded { ExtensionFilter::excluding(["dat"]) } else { ExtensionFilter::default() };
            let expected = size.authorize(&file(&path), Some(&meta)) && ext.authorize(&file(&path), Some(&meta));

            let mut chain = FilterChain::new();
            chain.add_skip_filter(Box::new(size));
            chain.add_skip_filter(Box::new(ext));
            prop_assert_eq!(chain.evaluate(&file(&path), Some(&meta)).is_authorized(), expected);
        }
    }
}
