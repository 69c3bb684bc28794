//! Read-side package queries.
//!
//! # Responsibility
//! - Project statistics and the current package from the metadata index.
//!
//! # Invariants
//! - Never writes; the closure flag always comes from the repository's last commit.

use crate::model::error::ErrorKind;
use crate::model::package::Package;
use crate::repo::metadata::{MetadataIndex, PackageStatistics};
use crate::repo::package_repo::{PackageRepository, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Error for package read queries.
#[derive(Debug)]
pub enum PackageManagerError {
    NoOpenPackages,
    Repo(RepoError),
}

impl PackageManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoOpenPackages => ErrorKind::Exhaustion,
            Self::Repo(err) => err.kind(),
        }
    }
}

impl Display for PackageManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOpenPackages => write!(f, "no open packages"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for PackageManagerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoOpenPackages => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for PackageManagerError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Aggregate queries over stored packages.
pub struct PackageManager<R: PackageRepository> {
    repo: Arc<R>,
    index: Arc<MetadataIndex>,
}

impl<R: PackageRepository> PackageManager<R> {
    pub fn new(repo: Arc<R>, index: Arc<MetadataIndex>) -> Self {
        Self { repo, index }
    }

    /// Open/closed counts, proportional to the number of packages.
    pub fn get_statistics(&self) -> PackageStatistics {
        self.index.statistics()
    }

    /// Loads the earliest-created open package.
    pub fn get_current_package(&self) -> Result<Package, PackageManagerError> {
        let package_id = self
            .index
            .first_open()
            .ok_or(PackageManagerError::NoOpenPackages)?;
        Ok(self.repo.get_by_id(package_id)?)
    }
}
