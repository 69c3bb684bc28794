//! Engine bootstrap.
//!
//! # Responsibility
//! - Turn an `EngineConfig` into wired components: logging, database, metadata
//!   index, repository, task manager and package manager.
//!
//! # Invariants
//! - The metadata index is created here and injected everywhere; there is no global one.
//! - The index is rebuilt from durable state before the engine is returned.

use crate::config::{ConfigError, EngineConfig};
use crate::db::{open_db_in_memory_with_timeout, open_db_with_timeout, DbError};
use crate::ingest::{ingest_package, IngestResult};
use crate::logging::init_logging;
use crate::model::package::PackageId;
use crate::model::policy::PackageProcessingPolicy;
use crate::repo::metadata::MetadataIndex;
use crate::repo::package_repo::{RepoError, SqlitePackageRepository};
use crate::service::package_manager::PackageManager;
use crate::service::task_manager::TaskManager;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::BufRead;
use std::sync::Arc;

/// Bootstrap failure.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Logging(String),
    Db(DbError),
    Repo(RepoError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(message) => write!(f, "logging setup failed: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(_) => None,
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Fully wired work-distribution engine over one SQLite database.
pub struct Engine {
    index: Arc<MetadataIndex>,
    repo: Arc<SqlitePackageRepository>,
    task_manager: TaskManager<SqlitePackageRepository>,
    package_manager: PackageManager<SqlitePackageRepository>,
    default_policy: PackageProcessingPolicy,
}

impl Engine {
    pub fn open(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        if let Some(log_dir) = &config.log_dir {
            let log_dir = log_dir.to_str().ok_or_else(|| {
                EngineError::Logging(format!(
                    "log_dir `{}` is not valid UTF-8",
                    log_dir.display()
                ))
            })?;
            init_logging(config.log_level(), log_dir).map_err(EngineError::Logging)?;
        }
        let default_policy = config.default_policy.to_policy()?;

        let busy_timeout = config.busy_timeout();
        let conn = match &config.database_path {
            Some(path) => open_db_with_timeout(path, busy_timeout)?,
            None => open_db_in_memory_with_timeout(busy_timeout)?,
        };
        let index = Arc::new(MetadataIndex::new());
        let repo = Arc::new(SqlitePackageRepository::try_new(conn, Arc::clone(&index))?);
        let task_manager = TaskManager::new(Arc::clone(&repo));
        let package_manager = PackageManager::new(Arc::clone(&repo), Arc::clone(&index));

        let stats = index.statistics();
        info!(
            "event=engine_open module=engine status=ok opened={} closed={}",
            stats.opened_packages, stats.closed_packages
        );

        Ok(Self {
            index,
            repo,
            task_manager,
            package_manager,
            default_policy,
        })
    }

    pub fn task_manager(&self) -> &TaskManager<SqlitePackageRepository> {
        &self.task_manager
    }

    pub fn package_manager(&self) -> &PackageManager<SqlitePackageRepository> {
        &self.package_manager
    }

    pub fn repository(&self) -> &Arc<SqlitePackageRepository> {
        &self.repo
    }

    pub fn index(&self) -> &Arc<MetadataIndex> {
        &self.index
    }

    pub fn default_policy(&self) -> PackageProcessingPolicy {
        self.default_policy
    }

    /// Ingests `reader` as a new package under the default policy.
    pub fn ingest(&self, reader: impl BufRead) -> IngestResult<PackageId> {
        ingest_package(self.repo.as_ref(), reader, self.default_policy)
    }
}
