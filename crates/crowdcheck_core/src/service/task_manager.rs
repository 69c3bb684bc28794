//! Task leasing scheduler.
//!
//! # Responsibility
//! - Hand out chunk leases across open packages, oldest package first.
//! - Reclaim expired leases lazily, on the request path.
//! - Register worker results under the same per-package exclusion as leasing.
//!
//! # Invariants
//! - Reclaim, search, assign and save for one package run under one package guard.
//! - Among eligible chunks the one with the fewest free slots wins; ties go to the
//!   earliest chunk.
//! - Errors are surfaced as-is; nothing is retried here.

use crate::model::chunk::{ChunkId, ChunkStatus, PackageChunk, ProcessedChunk};
use crate::model::error::{DomainError, ErrorKind};
use crate::model::now_epoch_ms;
use crate::model::package::{Package, PackageId};
use crate::model::user::{User, UserId};
use crate::repo::package_repo::{PackageRepository, RepoError};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type TaskResult<T> = Result<T, TaskError>;

/// Scheduler error for lease and result operations.
#[derive(Debug)]
pub enum TaskError {
    /// Every open package is exhausted for this user.
    NoTaskAvailable(UserId),
    Domain(DomainError),
    Repo(RepoError),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoTaskAvailable(_) => ErrorKind::Exhaustion,
            Self::Domain(err) => err.kind(),
            Self::Repo(err) => err.kind(),
        }
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoTaskAvailable(user_id) => write!(f, "no task available for user {user_id}"),
            Self::Domain(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NoTaskAvailable(_) => None,
            Self::Domain(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<DomainError> for TaskError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<RepoError> for TaskError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Pull-based allocator of chunk leases.
pub struct TaskManager<R: PackageRepository> {
    repo: Arc<R>,
}

impl<R: PackageRepository> TaskManager<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Leases a chunk to `user`, stamped with the current time.
    pub fn get_current_task(&self, user: &User) -> TaskResult<PackageChunk> {
        self.get_current_task_at(user, now_epoch_ms())
    }

    /// Leases a chunk to `user` as of `now_ms`.
    ///
    /// Returns a snapshot of the leased chunk after the lease was persisted.
    ///
    /// # Errors
    /// - `Domain(MissingUser)` for an unset user.
    /// - `NoTaskAvailable` when no open package has a slot for `user`.
    /// - `Repo(..)` for storage failures, unchanged.
    pub fn get_current_task_at(&self, user: &User, now_ms: i64) -> TaskResult<PackageChunk> {
        if !user.is_set() {
            return Err(DomainError::MissingUser.into());
        }

        for package_id in self.repo.list_open_package_ids()? {
            if let Some(chunk) = self.lease_from_package(package_id, user, now_ms)? {
                return Ok(chunk);
            }
        }

        info!(
            "event=task_lease module=scheduler status=exhausted user_id={}",
            user.id
        );
        Err(TaskError::NoTaskAvailable(user.id))
    }

    /// Registers a worker result on `package_id` and persists it.
    pub fn register_result(
        &self,
        package_id: PackageId,
        processed: &ProcessedChunk,
    ) -> TaskResult<()> {
        self.register_result_at(package_id, processed, now_epoch_ms())
    }

    /// Registers a worker result as of `now_ms`.
    ///
    /// # Errors
    /// - Domain errors of `Package::register_result`, including a result from a
    ///   user whose lease was already reclaimed.
    /// - `Repo(NotFound)` for an unknown package.
    pub fn register_result_at(
        &self,
        package_id: PackageId,
        processed: &ProcessedChunk,
        now_ms: i64,
    ) -> TaskResult<()> {
        let _guard = self.repo.lock_package(package_id);
        let mut package = self.repo.get_by_id(package_id)?;

        if let Err(err) = package.register_result_at(processed, now_ms) {
            warn!(
                "event=result_register module=scheduler status=rejected package_id={package_id} chunk_id={} user_id={} error_kind={}",
                processed.chunk_id,
                processed.user.id,
                err.kind()
            );
            return Err(err.into());
        }
        self.repo.save_package(&mut package)?;

        info!(
            "event=result_register module=scheduler status=ok package_id={package_id} chunk_id={} user_id={} items={}",
            processed.chunk_id,
            processed.user.id,
            processed.items.len()
        );
        Ok(())
    }

    fn lease_from_package(
        &self,
        package_id: PackageId,
        user: &User,
        now_ms: i64,
    ) -> TaskResult<Option<PackageChunk>> {
        let _guard = self.repo.lock_package(package_id);
        let mut package = match self.repo.get_by_id(package_id) {
            Ok(package) => package,
            Err(RepoError::NotFound(_)) => {
                warn!(
                    "event=task_lease module=scheduler status=skipped package_id={package_id} reason=body_missing"
                );
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if package.is_closed() {
            return Ok(None);
        }

        let reclaimed = package.reclaim_expired_leases(now_ms);
        if reclaimed > 0 {
            info!(
                "event=lease_reclaimed module=scheduler status=ok package_id={package_id} count={reclaimed}"
            );
        }

        let chunk_id = match select_chunk(&package, user) {
            Some(chunk_id) => chunk_id,
            None if package.has_raw_data() => {
                let chunk_id = package.create_chunk()?.id();
                debug!(
                    "event=chunk_created module=scheduler status=ok package_id={package_id} chunk_id={chunk_id}"
                );
                chunk_id
            }
            None => return Ok(None),
        };

        let chunk = package
            .chunk_mut(chunk_id)
            .ok_or(DomainError::ChunkNotFound(chunk_id))?;
        chunk.assign_users_at(std::slice::from_ref(user), now_ms)?;
        let leased = chunk.clone();
        self.repo.save_package(&mut package)?;

        info!(
            "event=task_assigned module=scheduler status=ok package_id={package_id} chunk_id={chunk_id} user_id={} assignees={}",
            user.id,
            leased.assignees().len()
        );
        Ok(Some(leased))
    }
}

/// Picks the eligible chunk closest to a full quorum group.
fn select_chunk(package: &Package, user: &User) -> Option<ChunkId> {
    package
        .chunks()
        .iter()
        .enumerate()
        .filter(|(_, chunk)| is_eligible(chunk, user))
        .min_by_key(|(position, chunk)| (chunk.free_slots(), *position))
        .map(|(_, chunk)| chunk.id())
}

fn is_eligible(chunk: &PackageChunk, user: &User) -> bool {
    chunk.status() != ChunkStatus::Completed
        && chunk.free_slots() > 0
        && !chunk.is_assignee(user)
        && !chunk.has_result(user)
}

#[cfg(test)]
mod tests {
    use super::select_chunk;
    use crate::model::chunk::Record;
    use crate::model::package::Package;
    use crate::model::policy::PackageProcessingPolicy;
    use crate::model::user::User;
    use std::time::Duration;

    fn package(records: u64, task_size: usize, group_size: usize) -> Package {
        let policy =
            PackageProcessingPolicy::new(task_size, group_size, Duration::from_secs(60)).unwrap();
        let records = (1..=records)
            .map(|line| Record::new(line, format!("r{line}")))
            .collect();
        Package::new(records, policy)
    }

    #[test]
    fn prefers_fullest_eligible_chunk() {
        let mut package = package(9, 3, 3);
        let first = package.create_chunk().unwrap().id();
        let second = package.create_chunk().unwrap().id();
        let third = package.create_chunk().unwrap().id();

        package
            .chunk_mut(second)
            .unwrap()
            .assign_users_at(&[User::new(1, "a"), User::new(2, "b")], 0)
            .unwrap();
        package
            .chunk_mut(third)
            .unwrap()
            .assign_users_at(&[User::new(3, "c")], 0)
            .unwrap();

        assert_eq!(select_chunk(&package, &User::new(9, "z")), Some(second));
        assert_eq!(select_chunk(&package, &User::new(1, "a")), Some(third));
        assert_ne!(select_chunk(&package, &User::new(9, "z")), Some(first));
    }

    #[test]
    fn ties_go_to_earliest_chunk() {
        let mut package = package(4, 2, 2);
        let first = package.create_chunk().unwrap().id();
        package.create_chunk().unwrap();

        assert_eq!(select_chunk(&package, &User::new(5, "e")), Some(first));
    }

    #[test]
    fn full_or_own_chunks_are_skipped() {
        let mut package = package(2, 2, 1);
        let chunk_id = package.create_chunk().unwrap().id();
        package
            .chunk_mut(chunk_id)
            .unwrap()
            .assign_users_at(&[User::new(1, "a")], 0)
            .unwrap();

        assert_eq!(select_chunk(&package, &User::new(1, "a")), None);
        assert_eq!(select_chunk(&package, &User::new(2, "b")), None);
    }
}
