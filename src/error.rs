//! Error types for the crawler

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur during a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Database operation failed
    DatabaseError,
    /// Hash computation failed
    HashError,
    /// Invalid path encoding
    InvalidPath,
    /// A configured root cannot be crawled
    InvalidRoot,
    /// Invalid or missing configuration value
    Config,
    /// Work queue push/pop failed
    Queue,
    /// An observer callback failed
    Observer,
    /// A path processor failed
    Processor,
    /// Unknown error
    Unknown,
}

/// Represents an error that occurred while crawling or processing
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct CrawlError {
    /// The kind of error
    pub kind: CrawlErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

pub type Result<T> = std::result::Result<T, CrawlError>;

impl CrawlError {
    /// Create a new crawl error
    pub fn new(kind: CrawlErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::new(
            CrawlErrorKind::PermissionDenied,
            Some(path.clone()),
            format!("Permission denied: {:?}", path),
        )
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            CrawlErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::DatabaseError, None, message)
    }

    /// Create a hash computation error
    pub fn hash_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::HashError, Some(path), message)
    }

    /// Create an invalid root error
    pub fn invalid_root(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::InvalidRoot, Some(path), message)
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Config, None, message)
    }

    pub fn queue_error(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Queue, None, message)
    }

    pub fn observer_error(message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Observer, None, message)
    }

    pub fn processor_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(CrawlErrorKind::Processor, Some(path), message)
    }

    /// Attach a path to an error that was created without one
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Whether the error means the path vanished from the filesystem
    pub fn is_not_found(&self) -> bool {
        self.kind == CrawlErrorKind::NotFound
    }
}

impl From<std::io::Error> for CrawlError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => CrawlErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => CrawlErrorKind::NotFound,
            _ => CrawlErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<walkdir::Error> for CrawlError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        let kind = match err.io_error().map(|e| e.kind()) {
            Some(std::io::ErrorKind::PermissionDenied) => CrawlErrorKind::PermissionDenied,
            Some(std::io::ErrorKind::NotFound) => CrawlErrorKind::NotFound,
            _ => CrawlErrorKind::IoError,
        };
        Self::new(kind, path, err.to_string())
    }
}

impl From<rusqlite::Error> for CrawlError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<toml::de::Error> for CrawlError {
    fn from(err: toml::de::Error) -> Self {
        Self::config_error(err.to_string())
    }
}

impl From<regex::Error> for CrawlError {
    fn from(err: regex::Error) -> Self {
        Self::config_error(format!("Invalid regex: {}", err))
    }
}

impl From<glob::PatternError> for CrawlError {
    fn from(err: glob::PatternError) -> Self {
        Self::config_error(format!("Invalid glob pattern: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err: CrawlError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert_eq!(err.kind, CrawlErrorKind::NotFound);
        assert!(err.is_not_found());

        let err: CrawlError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert_eq!(err.kind, CrawlErrorKind::PermissionDenied);

        let err: CrawlError = std::io::Error::other("boom").into();
        assert_eq!(err.kind, CrawlErrorKind::IoError);
    }

    #[test]
    fn test_with_path_keeps_existing() {
        let err = CrawlError::not_found(PathBuf::from("/a")).with_path("/b");
        assert_eq!(err.path, Some(PathBuf::from("/a")));

        let err = CrawlError::queue_error("closed").with_path("/b");
        assert_eq!(err.path, Some(PathBuf::from("/b")));
    }
}
