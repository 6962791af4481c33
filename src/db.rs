//! Path repository and its SQLite implementation
//!
//! Records are keyed by full path and written with an upsert, so repeated or
//! out-of-order saves of the same path are idempotent.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::{CrawlError, Result};
use crate::models::{ContentFamily, PathEntry, PathKind, PlatformFlags, Stage};

/// One member of a duplicate group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMember {
    pub path: String,
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Files sharing the same size and content hash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub size: u64,
    pub hash: String,
    /// First member by path
    pub representative: DuplicateMember,
    pub members: Vec<DuplicateMember>,
}

impl DuplicateGroup {
    pub fn count(&self) -> usize {
        self.members.len()
    }

    /// Bytes that would be freed by keeping only one copy
    pub fn wasted_bytes(&self) -> u64 {
        self.size * (self.members.len() as u64).saturating_sub(1)
    }
}

/// Persistence of path entries
pub trait PathRepository: Send + Sync {
    fn exists(&self, full_path: &str) -> Result<bool>;

    fn get(&self, full_path: &str) -> Result<Option<PathEntry>>;

    /// Up to `max_items` entries of the given kind at the given stage
    fn find_by_stage(&self, kind: PathKind, stage: Stage, max_items: usize)
        -> Result<Vec<PathEntry>>;

    fn find_by_hash(&self, hash: &str) -> Result<Vec<PathEntry>>;

    /// Groups of live files with identical size and hash, more than one member each
    fn find_duplicates(&self) -> Result<Vec<DuplicateGroup>>;

    /// Insert or update by full path
    fn save(&self, entry: &PathEntry) -> Result<()>;
}

const PATH_COLUMNS: &str = "path, root, relative_path, name, kind, extension, size, hash, hashes, \
     stage, classification, content_family, files_in_dir, created, modified, flags, owner, grp, \
     tags, keywords, rating, target_table";

/// SQLite-backed repository
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CrawlError::database_error(format!("open {:?}: {}", path, e)))?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let repo = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CrawlError::database_error("connection lock poisoned"))
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS paths (
                path TEXT PRIMARY KEY,
                root TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                extension TEXT,
                size INTEGER,
                hash TEXT,
                hashes TEXT,
                stage TEXT NOT NULL,
                classification TEXT,
                content_family TEXT,
                files_in_dir INTEGER,
                created INTEGER,
                modified INTEGER,
                flags INTEGER NOT NULL DEFAULT 0,
                owner TEXT,
                grp TEXT,
                tags TEXT,
                keywords TEXT,
                rating INTEGER,
                target_table TEXT,
                date_created TEXT NOT NULL,
                date_updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_paths_kind_stage ON paths(kind, stage);
            CREATE INDEX IF NOT EXISTS idx_paths_size_hash ON paths(size, hash);
            CREATE INDEX IF NOT EXISTS idx_paths_hash ON paths(hash);
            ",
        )?;
        Ok(())
    }

    /// Get path count
    pub fn path_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM paths", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Get stage counts
    pub fn count_by_stage(&self) -> Result<BTreeMap<String, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT stage, COUNT(*) FROM paths GROUP BY stage")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let (stage, count) = row?;
            counts.insert(stage, count);
        }
        Ok(counts)
    }

    fn query_entries(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PathEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

impl PathRepository for SqliteRepository {
    fn exists(&self, full_path: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()?
            .query_row("SELECT 1 FROM paths WHERE path = ?1", [full_path], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn get(&self, full_path: &str) -> Result<Option<PathEntry>> {
        let sql = format!("SELECT {} FROM paths WHERE path = ?1", PATH_COLUMNS);
        Ok(self
            .conn()?
            .query_row(&sql, [full_path], row_to_entry)
            .optional()?)
    }

    fn find_by_stage(
        &self,
        kind: PathKind,
        stage: Stage,
        max_items: usize,
    ) -> Result<Vec<PathEntry>> {
        let sql = format!(
            "SELECT {} FROM paths WHERE kind = ?1 AND stage = ?2 ORDER BY path LIMIT ?3",
            PATH_COLUMNS
        );
        self.query_entries(
            &sql,
            params![kind.as_str(), stage.as_str(), max_items as i64],
        )
    }

    fn find_by_hash(&self, hash: &str) -> Result<Vec<PathEntry>> {
        let sql = format!(
            "SELECT {} FROM paths WHERE hash = ?1 ORDER BY path",
            PATH_COLUMNS
        );
        self.query_entries(&sql, [hash])
    }

    fn find_duplicates(&self) -> Result<Vec<DuplicateGroup>> {
        let conn = self.conn()?;
        let mut groups_stmt = conn.prepare(
            "SELECT size, hash FROM paths
             WHERE kind = 'FILE' AND hash IS NOT NULL AND size IS NOT NULL
               AND stage != 'PATH_DELETED'
             GROUP BY size, hash
             HAVING COUNT(*) > 1
             ORDER BY size DESC, hash",
        )?;
        let keys = groups_stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, String>(1)?))
        })?;

        let mut members_stmt = conn.prepare(
            "SELECT path, name, modified FROM paths
             WHERE kind = 'FILE' AND size = ?1 AND hash = ?2 AND stage != 'PATH_DELETED'
             ORDER BY path",
        )?;

        let mut groups = Vec::new();
        for key in keys {
            let (size, hash) = key?;
            let rows = members_stmt.query_map(params![size as i64, hash], |row| {
                Ok(DuplicateMember {
                    path: row.get(0)?,
                    name: row.get(1)?,
                    modified: row
                        .get::<_, Option<i64>>(2)?
                        .and_then(DateTime::from_timestamp_micros),
                })
            })?;
            let mut members = Vec::new();
            for row in rows {
                members.push(row?);
            }
            let Some(representative) = members.first().cloned() else {
                continue;
            };
            groups.push(DuplicateGroup {
                size,
                hash,
                representative,
                members,
            });
        }
        Ok(groups)
    }

    fn save(&self, entry: &PathEntry) -> Result<()> {
        let full_path = entry.full_path();
        let now = Utc::now().to_rfc3339();
        let context = |e: rusqlite::Error| {
            CrawlError::database_error(format!("upsert into paths for {}: {}", full_path, e))
        };

        self.conn()?
            .execute(
                "INSERT INTO paths (path, root, relative_path, name, kind, extension, size, hash,
                     hashes, stage, classification, content_family, files_in_dir, created, modified,
                     flags, owner, grp, tags, keywords, rating, target_table, date_created, date_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23)
                 ON CONFLICT(path) DO UPDATE SET
                     root = excluded.root,
                     relative_path = excluded.relative_path,
                     name = excluded.name,
                     kind = excluded.kind,
                     extension = excluded.extension,
                     size = excluded.size,
                     hash = excluded.hash,
                     hashes = excluded.hashes,
                     stage = excluded.stage,
                     classification = excluded.classification,
                     content_family = excluded.content_family,
                     files_in_dir = excluded.files_in_dir,
                     created = excluded.created,
                     modified = excluded.modified,
                     flags = excluded.flags,
                     owner = excluded.owner,
                     grp = excluded.grp,
                     tags = excluded.tags,
                     keywords = excluded.keywords,
                     rating = excluded.rating,
                     target_table = excluded.target_table,
                     date_updated = excluded.date_updated",
                params![
                    full_path,
                    entry.root,
                    entry.relative_path,
                    entry.name,
                    entry.kind.as_str(),
                    entry.extension,
                    entry.size.map(|s| s as i64),
                    entry.hash,
                    to_json(&entry.hashes),
                    entry.stage.as_str(),
                    entry.classification.as_ref().and_then(to_json),
                    entry.content_family.map(|f| f.as_str()),
                    entry.files_in_dir.map(|n| n as i64),
                    entry.created.map(|t| t.timestamp_micros()),
                    entry.modified.map(|t| t.timestamp_micros()),
                    flags_to_bits(&entry.flags),
                    entry.owner,
                    entry.group,
                    to_json(&entry.tags),
                    to_json(&entry.keywords),
                    entry.rating,
                    entry.target_table,
                    now,
                ],
            )
            .map_err(context)?;
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

fn conversion_error(index: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn json_column<T: serde::de::DeserializeOwned + Default>(
    row: &Row<'_>,
    index: usize,
) -> rusqlite::Result<T> {
    match row.get::<_, Option<String>>(index)? {
        Some(text) => serde_json::from_str(&text).map_err(|e| conversion_error(index, e)),
        None => Ok(T::default()),
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<PathEntry> {
    let kind: PathKind = row
        .get::<_, String>(4)?
        .parse()
        .map_err(|e| conversion_error(4, e))?;
    let stage: Stage = row
        .get::<_, String>(9)?
        .parse()
        .map_err(|e| conversion_error(9, e))?;
    let classification = match row.get::<_, Option<String>>(10)? {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| conversion_error(10, e))?),
        None => None,
    };
    let content_family = match row.get::<_, Option<String>>(11)? {
        Some(name) => Some(
            serde_json::from_value::<ContentFamily>(serde_json::Value::String(name))
                .map_err(|e| conversion_error(11, e))?,
        ),
        None => None,
    };

    Ok(PathEntry {
        path: PathBuf::from(row.get::<_, String>(0)?),
        root: row.get(1)?,
        relative_path: row.get(2)?,
        name: row.get(3)?,
        kind,
        extension: row.get(5)?,
        size: row.get::<_, Option<i64>>(6)?.map(|s| s as u64),
        hash: row.get(7)?,
        hashes: json_column(row, 8)?,
        stage,
        classification,
        content_family,
        files_in_dir: row.get::<_, Option<i64>>(12)?.map(|n| n as u64),
        created: row
            .get::<_, Option<i64>>(13)?
            .and_then(DateTime::from_timestamp_micros),
        modified: row
            .get::<_, Option<i64>>(14)?
            .and_then(DateTime::from_timestamp_micros),
        flags: flags_from_bits(row.get(15)?),
        owner: row.get(16)?,
        group: row.get(17)?,
        tags: json_column(row, 18)?,
        keywords: json_column(row, 19)?,
        rating: row.get(20)?,
        target_table: row.get(21)?,
    })
}

fn flags_to_bits(flags: &PlatformFlags) -> i64 {
    [
        flags.hidden,
        flags.system,
        flags.readonly,
        flags.archive,
        flags.compressed,
        flags.encrypted,
        flags.offline,
        flags.temporary,
    ]
    .iter()
    .enumerate()
    .fold(0, |bits, (i, set)| if *set { bits | (1 << i) } else { bits })
}

fn flags_from_bits(bits: i64) -> PlatformFlags {
    let bit = |i: u32| bits & (1 << i) != 0;
    PlatformFlags {
        hidden: bit(0),
        system: bit(1),
        readonly: bit(2),
        archive: bit(3),
        compressed: bit(4),
        encrypted: bit(5),
        offline: bit(6),
        temporary: bit(7),
    }
}
