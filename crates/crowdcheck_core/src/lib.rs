//! Core of a quorum-verified work-distribution engine.
//! This crate is the single source of truth for chunk leasing and package closure.

pub mod config;
pub mod db;
pub mod engine;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig, PolicyConfig};
pub use engine::{Engine, EngineError};
pub use ingest::{ingest_package, parse_records, IngestError, IngestResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::chunk::{
    Assignment, ChunkId, ChunkResult, ChunkStatus, Mark, PackageChunk, ProcessedChunk,
    ProcessedItem, Record,
};
pub use model::error::{DomainError, DomainResult, ErrorKind};
pub use model::package::{Package, PackageId};
pub use model::policy::PackageProcessingPolicy;
pub use model::user::{User, UserId};
pub use repo::locks::{PackageGuard, PackageLocks};
pub use repo::metadata::{IndexEntry, MetadataIndex, PackageStatistics};
pub use repo::package_repo::{PackageRepository, RepoError, RepoResult, SqlitePackageRepository};
pub use service::package_manager::{PackageManager, PackageManagerError};
pub use service::task_manager::{TaskError, TaskManager, TaskResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
