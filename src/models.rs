//! Core data models for the crawler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::CrawlError;

/// Whether a path is a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathKind {
    File,
    Directory,
}

impl PathKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PathKind::File => "FILE",
            PathKind::Directory => "DIRECTORY",
        }
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PathKind {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FILE" => Ok(PathKind::File),
            "DIRECTORY" | "DIR" => Ok(PathKind::Directory),
            other => Err(CrawlError::config_error(format!("Unknown path kind '{}'", other))),
        }
    }
}

/// Position of a path in the metadata extraction lifecycle
///
/// Variants are declared in lifecycle order so that `Ord` reflects progress.
/// `PathDeleted` is terminal and reachable from any stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Crawled,
    AttributesExtracted,
    HashComputed,
    TextExtracted,
    ThumbnailGenerated,
    Indexed,
    PathDeleted,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Crawled,
        Stage::AttributesExtracted,
        Stage::HashComputed,
        Stage::TextExtracted,
        Stage::ThumbnailGenerated,
        Stage::Indexed,
        Stage::PathDeleted,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Crawled => "CRAWLED",
            Stage::AttributesExtracted => "ATTRIBUTES_EXTRACTED",
            Stage::HashComputed => "HASH_COMPUTED",
            Stage::TextExtracted => "TEXT_EXTRACTED",
            Stage::ThumbnailGenerated => "THUMBNAIL_GENERATED",
            Stage::Indexed => "INDEXED",
            Stage::PathDeleted => "PATH_DELETED",
        }
    }

    /// Whether no further processing applies
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Indexed | Stage::PathDeleted)
    }

    /// Combine a previously persisted stage with a newly reached one.
    ///
    /// Progress never moves backwards, except that a deleted path seen again
    /// starts over from whatever stage the new pass reached.
    pub fn merge(self, reached: Stage) -> Stage {
        match (self, reached) {
            (_, Stage::PathDeleted) => Stage::PathDeleted,
            (Stage::PathDeleted, reached) => reached,
            (previous, reached) => previous.max(reached),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == upper)
            .ok_or_else(|| CrawlError::config_error(format!("Unknown stage '{}'", s)))
    }
}

/// Content category propagated from a root to every path below it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Audio,
    Picture,
    Video,
    Document,
    Application,
    Archive,
    Code,
    Other,
}

/// Minimum audience age (PEGI levels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum MinAge {
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "12")]
    Twelve,
    #[serde(rename = "16")]
    Sixteen,
    #[default]
    #[serde(rename = "18")]
    EighteenOrMore,
}

impl MinAge {
    pub fn years(&self) -> u8 {
        match self {
            MinAge::Three => 3,
            MinAge::Seven => 7,
            MinAge::Twelve => 12,
            MinAge::Sixteen => 16,
            MinAge::EighteenOrMore => 18,
        }
    }
}

/// Content classification attached to a root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub category: ContentCategory,
    #[serde(default)]
    pub min_age: MinAge,
}

/// Content family inferred from mime type or extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFamily {
    Audio,
    Picture,
    Video,
    Document,
    Application,
    Archive,
}

impl ContentFamily {
    /// Infer the family from a mime type such as `image/jpeg`
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        if mime_type.is_empty() {
            return None;
        }
        let mime = mime_type.to_ascii_lowercase();
        if mime.starts_with("audio") || mime.contains("music") {
            return Some(ContentFamily::Audio);
        }
        if mime.starts_with("video") {
            return Some(ContentFamily::Video);
        }
        if mime.starts_with("image") {
            return Some(ContentFamily::Picture);
        }
        const DOCUMENT_HINTS: [&str; 11] = [
            "word",
            "excel",
            "powerpoint",
            "office",
            "openxmlformats-officedocument",
            "spreadsheet",
            "visio",
            "x-tika-msworks",
            "x-tika-ooxml",
            "pdf",
            "onenote",
        ];
        if mime.starts_with("message")
            || mime.starts_with("text")
            || (mime.starts_with("application/") && DOCUMENT_HINTS.iter().any(|h| mime.contains(h)))
        {
            return Some(ContentFamily::Document);
        }
        const ARCHIVE_HINTS: [&str; 6] = ["tar", "zip", "rar", "7z", "archive", "compressed"];
        if mime.starts_with("application/") && ARCHIVE_HINTS.iter().any(|h| mime.contains(h)) {
            return Some(ContentFamily::Archive);
        }
        Some(ContentFamily::Application)
    }

    /// Infer the family from a lowercase file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext_lower = ext.to_lowercase();
        let family = match ext_lower.as_str() {
            "mp3" | "flac" | "wav" | "aac" | "ogg" | "wma" | "m4a" | "aiff" => ContentFamily::Audio,
            "mp4" | "mkv" | "avi" | "wmv" | "flv" | "mov" | "webm" | "m4v" | "ts" | "rmvb" => {
                ContentFamily::Video
            }
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "tiff" | "tif" | "heic" => {
                ContentFamily::Picture
            }
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "txt" | "md"
            | "rtf" | "csv" | "eml" => ContentFamily::Document,
            "zip" | "tar" | "gz" | "tgz" | "rar" | "7z" | "bz2" | "xz" => ContentFamily::Archive,
            "exe" | "dll" | "so" | "dylib" | "app" | "msi" | "dmg" | "jar" => {
                ContentFamily::Application
            }
            _ => return None,
        };
        Some(family)
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentFamily::Audio => "audio",
            ContentFamily::Picture => "picture",
            ContentFamily::Video => "video",
            ContentFamily::Document => "document",
            ContentFamily::Application => "application",
            ContentFamily::Archive => "archive",
        }
    }
}

/// Platform attribute flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformFlags {
    pub hidden: bool,
    pub system: bool,
    pub readonly: bool,
    pub archive: bool,
    pub compressed: bool,
    pub encrypted: bool,
    pub offline: bool,
    pub temporary: bool,
}

/// One filesystem file or directory and its derived metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Absolute, symlink-resolved path
    pub path: PathBuf,
    /// Virtual root prefix stripped from `path` to form `relative_path`
    pub root: String,
    /// Path relative to the virtual root, always `/`-separated
    pub relative_path: String,
    /// Entry name
    pub name: String,
    pub kind: PathKind,
    /// Lowercase extension without the dot (files only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Size in bytes; for directories, the aggregated size of crawled files below
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Primary content hash (first configured algorithm)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Every computed digest keyed by algorithm name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_family: Option<ContentFamily>,
    /// Number of crawled files below a directory (directories only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_in_dir: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub flags: PlatformFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    /// Target table of the root this entry was crawled from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
}

impl PathEntry {
    fn base(path: PathBuf, root: &str, kind: PathKind) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let relative_path = relative_to_root(&path, root);
        Self {
            path,
            root: root.to_string(),
            relative_path,
            name,
            kind,
            extension: None,
            size: None,
            hash: None,
            hashes: BTreeMap::new(),
            stage: Stage::Crawled,
            classification: None,
            content_family: None,
            files_in_dir: None,
            created: None,
            modified: None,
            flags: PlatformFlags::default(),
            owner: None,
            group: None,
            tags: BTreeMap::new(),
            keywords: Vec::new(),
            rating: None,
            target_table: None,
        }
    }

    /// Create a file entry
    pub fn file(path: PathBuf, root: &str, size: Option<u64>) -> Self {
        let mut entry = Self::base(path, root, PathKind::File);
        entry.extension = extension_of(&entry.path);
        entry.content_family = entry.extension.as_deref().and_then(ContentFamily::from_extension);
        entry.size = size;
        entry
    }

    /// Create a directory entry whose size and file count are not known yet
    pub fn pending_directory(path: PathBuf, root: &str) -> Self {
        Self::base(path, root, PathKind::Directory)
    }

    /// Create a directory entry with its aggregated size and file count
    pub fn directory(path: PathBuf, root: &str, size: u64, files_in_dir: u64) -> Self {
        let mut entry = Self::base(path, root, PathKind::Directory);
        entry.size = Some(size);
        entry.files_in_dir = Some(files_in_dir);
        entry
    }

    pub fn with_classification(mut self, classification: Option<Classification>) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    /// Full path as a `/`-separated string, the persistence key
    pub fn full_path(&self) -> String {
        normalize_path(&self.path)
    }

    pub fn is_file(&self) -> bool {
        self.kind == PathKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == PathKind::Directory
    }

    /// Whether the entry carries no data worth a full record
    pub fn is_empty(&self) -> bool {
        self.size.unwrap_or(0) == 0 && self.files_in_dir.unwrap_or(0) == 0
    }
}

/// Normalize path separators for cross-platform consistency
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Lowercase extension of a file name, if any
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_lowercase())
}

fn relative_to_root(path: &Path, root: &str) -> String {
    let full = normalize_path(path);
    let root = root.replace('\\', "/");
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return full;
    }
    match full.strip_prefix(root) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => full,
    }
}

/// Read-only snapshot of crawl run counters handed to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub paths_found: u64,
    pub paths_skipped: u64,
    pub files_skipped: u64,
    pub directories_skipped: u64,
    pub files_crawled: u64,
    pub directories_crawled: u64,
    /// Bytes of every file found, including ones denied later by notify filters
    pub bytes_crawled: u64,
    /// Bytes of files reported as crawled
    pub bytes_processed: u64,
    pub errors: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    /// Files and directories reported as crawled
    pub fn paths_processed(&self) -> u64 {
        self.files_crawled + self.directories_crawled
    }

    /// Run duration in milliseconds, if the run has ended
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }
}

/// Run-level summary produced when a crawl finishes, normally or via stop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub stopped: bool,
    #[serde(flatten)]
    pub walk: RunSnapshot,
    pub paths_persisted: u64,
    pub paths_unchanged: u64,
    pub processor_errors: u64,
    pub persistence_errors: u64,
    pub empty_directories: usize,
}

impl RunSummary {
    pub fn error_count(&self) -> u64 {
        self.walk.errors + self.processor_errors + self.persistence_errors
    }
}
