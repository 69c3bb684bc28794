//! Package repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist full package bodies keyed by package id.
//! - Keep the durable `package_index` and the cached `MetadataIndex` in step with bodies.
//! - Reject stale writes through an optimistic version check.
//!
//! # Invariants
//! - Body and index row are written in one transaction; the cache is refreshed only
//!   after commit, while the connection is still held.
//! - Write paths call `Package::validate()` before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.

use super::locks::{PackageGuard, PackageLocks};
use super::metadata::{IndexEntry, MetadataIndex};
use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::error::{DomainError, ErrorKind};
use crate::model::package::{Package, PackageId};
use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

const REQUIRED_TABLES: [&str; 2] = ["packages", "package_index"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for package persistence and lookups.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(PackageId),
    /// Stored revision differs from the revision the caller fetched.
    VersionConflict {
        package_id: PackageId,
        expected: u64,
        actual: u64,
    },
    /// Aggregate refused by its own invariants before writing.
    Domain(DomainError),
    Serialization(serde_json::Error),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::VersionConflict { .. } => ErrorKind::Conflict,
            Self::Domain(err) => err.kind(),
            Self::Db(_)
            | Self::Serialization(_)
            | Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_) => ErrorKind::Storage,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "package not found: {id}"),
            Self::VersionConflict {
                package_id,
                expected,
                actual,
            } => write!(
                f,
                "package {package_id} was modified concurrently: expected version {expected}, found {actual}"
            ),
            Self::Domain(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "package body serialization failed: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted package data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "package repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "package repository requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Domain(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::NotFound(_)
            | Self::VersionConflict { .. }
            | Self::InvalidData(_)
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<DomainError> for RepoError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Persistence contract over package aggregates.
pub trait PackageRepository: Send + Sync {
    /// Upserts the package body and its index entry atomically.
    ///
    /// On success `package.version()` is advanced to the stored revision.
    fn save_package(&self, package: &mut Package) -> RepoResult<()>;
    /// Loads one package body at its current revision.
    fn get_by_id(&self, package_id: PackageId) -> RepoResult<Package>;
    /// Ids of open packages, oldest first.
    fn list_open_package_ids(&self) -> RepoResult<Vec<PackageId>>;
    /// Serializes read-modify-write sequences on one package id.
    fn lock_package(&self, package_id: PackageId) -> PackageGuard<'_>;
}

/// SQLite-backed package repository.
pub struct SqlitePackageRepository {
    conn: Mutex<Connection>,
    index: Arc<MetadataIndex>,
    locks: PackageLocks,
}

impl SqlitePackageRepository {
    /// Creates repository from a migrated connection and rebuilds `index` from it.
    pub fn try_new(conn: Connection, index: Arc<MetadataIndex>) -> RepoResult<Self> {
        ensure_package_connection_ready(&conn)?;
        let repo = Self {
            conn: Mutex::new(conn),
            index,
            locks: PackageLocks::new(),
        };
        repo.reload_index()?;
        Ok(repo)
    }

    pub fn index(&self) -> &Arc<MetadataIndex> {
        &self.index
    }

    /// Resets the cached index and reloads it from durable rows.
    ///
    /// Returns the number of indexed packages.
    pub fn reload_index(&self) -> RepoResult<usize> {
        let conn = self.conn();
        let entries = load_index_entries(&conn)?;
        let count = entries.len();
        self.index.reset();
        self.index.load(entries);
        info!("event=index_reload module=repo status=ok packages={count}");
        Ok(count)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PackageRepository for SqlitePackageRepository {
    fn save_package(&self, package: &mut Package) -> RepoResult<()> {
        package.validate()?;

        let package_id = package.id();
        let expected = package.version();
        let closed = package.is_closed();
        let body = serde_json::to_string(&*package)?;

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored = tx
            .query_row(
                "SELECT version FROM packages WHERE package_uuid = ?1;",
                [package_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(version_from_db)
            .transpose()?;

        match (expected, stored) {
            (0, None) => {
                tx.execute(
                    "INSERT INTO packages (package_uuid, version, body) VALUES (?1, 1, ?2);",
                    params![package_id.to_string(), body],
                )?;
            }
            (_, None) => return Err(RepoError::NotFound(package_id)),
            (expected, Some(actual)) if expected != actual => {
                warn!(
                    "event=version_conflict module=repo status=rejected package_id={package_id} expected={expected} actual={actual}"
                );
                return Err(RepoError::VersionConflict {
                    package_id,
                    expected,
                    actual,
                });
            }
            (expected, Some(_)) => {
                tx.execute(
                    "UPDATE packages
                     SET
                        version = version + 1,
                        body = ?1,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE package_uuid = ?2
                       AND version = ?3;",
                    params![body, package_id.to_string(), version_to_db(expected)?],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO package_index (package_uuid, created_at, is_closed)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (package_uuid) DO UPDATE SET is_closed = excluded.is_closed;",
            params![
                package_id.to_string(),
                package.created_at(),
                bool_to_int(closed)
            ],
        )?;
        let seq: i64 = tx.query_row(
            "SELECT seq FROM package_index WHERE package_uuid = ?1;",
            [package_id.to_string()],
            |row| row.get(0),
        )?;
        tx.commit()?;

        let was_closed = self.index.entry(package_id).map(|entry| entry.closed);
        self.index.upsert(IndexEntry {
            package_id,
            seq,
            created_at: package.created_at(),
            closed,
        });
        drop(conn);

        let version = expected + 1;
        package.set_version(version);
        info!(
            "event=package_saved module=repo status=ok package_id={package_id} version={version} closed={closed}"
        );
        if closed && was_closed != Some(true) {
            info!("event=package_closed module=repo status=ok package_id={package_id}");
        }
        Ok(())
    }

    fn get_by_id(&self, package_id: PackageId) -> RepoResult<Package> {
        let row = self
            .conn()
            .query_row(
                "SELECT version, body FROM packages WHERE package_uuid = ?1;",
                [package_id.to_string()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let (version, body) = row.ok_or(RepoError::NotFound(package_id))?;

        let mut package: Package = serde_json::from_str(&body)?;
        if package.id() != package_id {
            return Err(RepoError::InvalidData(format!(
                "row `{package_id}` holds body of package `{}`",
                package.id()
            )));
        }
        package.validate().map_err(|err| {
            RepoError::InvalidData(format!("package `{package_id}` failed validation: {err}"))
        })?;
        package.set_version(version_from_db(version)?);
        Ok(package)
    }

    fn list_open_package_ids(&self) -> RepoResult<Vec<PackageId>> {
        Ok(self.index.open_ids_in_creation_order())
    }

    fn lock_package(&self, package_id: PackageId) -> PackageGuard<'_> {
        self.locks.acquire(package_id)
    }
}

fn load_index_entries(conn: &Connection) -> RepoResult<Vec<IndexEntry>> {
    let mut stmt = conn.prepare(
        "SELECT seq, package_uuid, created_at, is_closed
         FROM package_index
         ORDER BY created_at ASC, seq ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get("package_uuid")?;
        let package_id = Uuid::parse_str(&uuid_text).map_err(|_| {
            RepoError::InvalidData(format!(
                "invalid uuid value `{uuid_text}` in package_index.package_uuid"
            ))
        })?;
        let closed = match row.get::<_, i64>("is_closed")? {
            0 => false,
            1 => true,
            other => {
                return Err(RepoError::InvalidData(format!(
                    "invalid is_closed value `{other}` in package_index.is_closed"
                )));
            }
        };
        entries.push(IndexEntry {
            package_id,
            seq: row.get("seq")?,
            created_at: row.get("created_at")?,
            closed,
        });
    }
    Ok(entries)
}

fn ensure_package_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn version_from_db(value: i64) -> RepoResult<u64> {
    u64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid package version `{value}`")))
}

fn version_to_db(value: u64) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("package version `{value}` out of range")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
