//! Path processors run by the worker stage
//!
//! A processor mutates a [`PathEntry`] in place and may fail for that
//! (path, processor) pair only. Successful processors advance the entry to
//! the stage they declare.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, Metadata};
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{CrawlError, Result};
use crate::events::CrawlEvent;
use crate::models::{PathEntry, PathKind, Stage};

/// Default read chunk for streaming hashes (6.4 MB)
pub const DEFAULT_HASH_CHUNK_SIZE: usize = 64 * 1024 * 100;

/// Which kinds of entries a processor handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    File,
    Directory,
    All,
}

impl Applicability {
    pub fn matches(&self, kind: PathKind) -> bool {
        match self {
            Applicability::All => true,
            Applicability::File => kind == PathKind::File,
            Applicability::Directory => kind == PathKind::Directory,
        }
    }
}

/// A pluggable unit of work applied to an entry
pub trait PathProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn applicability(&self) -> Applicability;

    /// Stage reached when `process` succeeds, if any
    fn stage(&self) -> Option<Stage> {
        None
    }

    /// Mutate the entry in place. `event` is absent during stage-advance passes.
    fn process(&self, event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()>;
}

/// Supported content hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    #[default]
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            HashAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => format!("{:x}", h.finalize()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Stream a file once through every requested algorithm
///
/// Returns hex digests keyed by algorithm name.
pub fn hash_file(
    path: &Path,
    algorithms: &[HashAlgorithm],
    chunk_size: usize,
) -> Result<BTreeMap<String, String>> {
    let file = File::open(path).map_err(|e| CrawlError::from(e).with_path(path))?;
    let mut reader = BufReader::new(file);
    let mut hashers: Vec<(HashAlgorithm, Hasher)> =
        algorithms.iter().map(|a| (*a, a.hasher())).collect();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let n = reader
            .read(&mut buffer)
            .map_err(|e| CrawlError::hash_error(path.to_path_buf(), e.to_string()))?;
        if n == 0 {
            break;
        }
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(algorithm, hasher)| (algorithm.as_str().to_string(), hasher.finalize_hex()))
        .collect())
}

/// Computes content digests of files
pub struct HashProcessor {
    algorithms: Vec<HashAlgorithm>,
    chunk_size: usize,
}

impl HashProcessor {
    /// An empty algorithm list falls back to the default algorithm
    pub fn new(algorithms: Vec<HashAlgorithm>, chunk_size: usize) -> Self {
        let algorithms = if algorithms.is_empty() {
            vec![HashAlgorithm::default()]
        } else {
            algorithms
        };
        Self {
            algorithms,
            chunk_size,
        }
    }
}

impl Default for HashProcessor {
    fn default() -> Self {
        Self::new(vec![HashAlgorithm::default()], DEFAULT_HASH_CHUNK_SIZE)
    }
}

impl PathProcessor for HashProcessor {
    fn name(&self) -> &str {
        "hash"
    }

    fn applicability(&self) -> Applicability {
        Applicability::File
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::HashComputed)
    }

    fn process(&self, _event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()> {
        let digests = hash_file(&entry.path, &self.algorithms, self.chunk_size)?;
        entry.hash = digests.get(self.algorithms[0].as_str()).cloned();
        entry.hashes.extend(digests);
        Ok(())
    }
}

/// Extracts timestamps, ownership and platform flags
#[derive(Debug, Default)]
pub struct AttributesProcessor;

impl AttributesProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl PathProcessor for AttributesProcessor {
    fn name(&self) -> &str {
        "attributes"
    }

    fn applicability(&self) -> Applicability {
        Applicability::All
    }

    fn stage(&self) -> Option<Stage> {
        Some(Stage::AttributesExtracted)
    }

    fn process(&self, _event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()> {
        let metadata = std::fs::symlink_metadata(&entry.path)
            .map_err(|e| CrawlError::from(e).with_path(&entry.path))?;

        entry.modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        entry.created = metadata.created().ok().map(DateTime::<Utc>::from);
        entry.flags.hidden = entry.name.starts_with('.');
        entry.flags.readonly = metadata.permissions().readonly();
        if entry.is_file() {
            entry.size = Some(metadata.len());
        }
        apply_platform_attributes(entry, &metadata);
        Ok(())
    }
}

#[cfg(unix)]
fn apply_platform_attributes(entry: &mut PathEntry, metadata: &Metadata) {
    use std::os::unix::fs::MetadataExt;

    entry.owner = Some(metadata.uid().to_string());
    entry.group = Some(metadata.gid().to_string());
}

#[cfg(windows)]
fn apply_platform_attributes(entry: &mut PathEntry, metadata: &Metadata) {
    use std::os::windows::fs::MetadataExt;

    const READONLY: u32 = 0x1;
    const HIDDEN: u32 = 0x2;
    const SYSTEM: u32 = 0x4;
    const ARCHIVE: u32 = 0x20;
    const TEMPORARY: u32 = 0x100;
    const COMPRESSED: u32 = 0x800;
    const OFFLINE: u32 = 0x1000;
    const ENCRYPTED: u32 = 0x4000;

    let attributes = metadata.file_attributes();
    let flags = &mut entry.flags;
    flags.readonly |= attributes & READONLY != 0;
    flags.hidden |= attributes & HIDDEN != 0;
    flags.system = attributes & SYSTEM != 0;
    flags.archive = attributes & ARCHIVE != 0;
    flags.temporary = attributes & TEMPORARY != 0;
    flags.compressed = attributes & COMPRESSED != 0;
    flags.offline = attributes & OFFLINE != 0;
    flags.encrypted = attributes & ENCRYPTED != 0;
}

#[cfg(not(any(unix, windows)))]
fn apply_platform_attributes(_entry: &mut PathEntry, _metadata: &Metadata) {}

/// Split one part of a file name into keywords
///
/// The part needs at least one `,`, `_` or `.` separator and nothing but
/// ASCII letters, digits, separators and whitespace.
pub fn split_keywords(part: &str) -> Option<Vec<String>> {
    let part = part.replace(['.', '_'], ", ");
    if !part.contains(", ") {
        return None;
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ',' || c == ']' || c.is_whitespace())
    {
        return None;
    }
    let keywords: Vec<String> = part
        .split(", ")
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    (!keywords.is_empty()).then_some(keywords)
}

/// Keywords from the last usable part of a name split on `separator`
fn keywords_after(stem: &str, separator: char) -> Option<Vec<String>> {
    stem.rsplit(separator)
        .find_map(|part| split_keywords(&part.replace(']', "")))
}

/// Derives keywords from a file name such as `Title - beach_sunset.jpg`
/// or `Title [beach.sunset].jpg`
#[derive(Debug, Default)]
pub struct KeywordsProcessor;

impl KeywordsProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl PathProcessor for KeywordsProcessor {
    fn name(&self) -> &str {
        "keywords"
    }

    fn applicability(&self) -> Applicability {
        Applicability::File
    }

    fn process(&self, _event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()> {
        let stem = Path::new(&entry.name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut keywords = None;
        if stem.contains("- ") {
            keywords = keywords_after(&stem, '-');
        }
        if keywords.is_none() && stem.contains('[') {
            keywords = keywords_after(&stem, '[');
        }
        if let Some(found) = keywords {
            log::debug!("Keywords {:?} for {}", found, entry.full_path());
            entry.keywords = found;
        }
        Ok(())
    }
}

/// Highest rating a path can carry
pub const MAX_RATING: u8 = 5;

/// Rating from the first run of `+` in a path, capped at [`MAX_RATING`]
pub fn rating_from_path(path: &str) -> Option<u8> {
    let run = path.split(|c| c != '+').find(|s| !s.is_empty())?;
    Some(run.len().min(MAX_RATING as usize) as u8)
}

/// Rates files marked with `+` runs, as in `holidays/+++/beach.jpg`
#[derive(Debug, Default)]
pub struct RatingProcessor;

impl RatingProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl PathProcessor for RatingProcessor {
    fn name(&self) -> &str {
        "rating"
    }

    fn applicability(&self) -> Applicability {
        Applicability::File
    }

    fn process(&self, _event: Option<&CrawlEvent>, entry: &mut PathEntry) -> Result<()> {
        let full_path = entry.full_path();
        if let Some(rating) = rating_from_path(&full_path) {
            log::debug!("Rating {} for {}", rating, full_path);
            entry.rating = Some(rating);
        }
        Ok(())
    }
}
