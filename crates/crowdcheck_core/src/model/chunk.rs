//! Package chunk domain model.
//!
//! # Responsibility
//! - Hold one bounded slice of package records and the leases/results on it.
//! - Enforce quorum bounds on every assignment and result.
//!
//! # Invariants
//! - `assignees.len() <= group_size` and `results.len() <= group_size`.
//! - Every user with a result is also an assignee; a result is never retracted.
//! - `status()` is derived from counts and is never stored.
//!
//! # See also
//! - `model::package` for chunk creation and result registration.

use super::error::{DomainError, DomainResult};
use super::now_epoch_ms;
use super::package::PackageId;
use super::policy::PackageProcessingPolicy;
use super::user::User;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Stable chunk identifier, unique across packages.
pub type ChunkId = Uuid;

/// Lifecycle of a chunk as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// No leases and no results.
    NotAssigned,
    /// At least one lease, no results yet.
    Assigned,
    /// Some, but not all, of the quorum has reported.
    Active,
    /// The quorum has reported.
    Completed,
}

impl ChunkStatus {
    /// Pure status function over assignee/result counts.
    pub fn from_counts(assignees: usize, results: usize, group_size: usize) -> Self {
        if results >= group_size {
            Self::Completed
        } else if results > 0 {
            Self::Active
        } else if assignees > 0 {
            Self::Assigned
        } else {
            Self::NotAssigned
        }
    }
}

/// One validated raw record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 1-based position in the ingested source.
    pub line: u64,
    pub value: String,
}

impl Record {
    pub fn new(line: u64, value: impl Into<String>) -> Self {
        Self {
            line,
            value: value.into(),
        }
    }
}

/// A worker's per-item verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mark {
    Correct,
    Incorrect,
}

/// One record together with the verdict a worker gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub record: Record,
    pub mark: Mark,
}

/// Result payload submitted by a worker for one chunk. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedChunk {
    pub chunk_id: ChunkId,
    pub user: User,
    pub items: Vec<ProcessedItem>,
}

impl ProcessedChunk {
    pub fn new(chunk_id: ChunkId, user: User, items: Vec<ProcessedItem>) -> Self {
        Self {
            chunk_id,
            user,
            items,
        }
    }
}

/// Lease held by one user on a chunk slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub user: User,
    /// Unix epoch milliseconds.
    pub assigned_at: i64,
}

/// Result registered by one user on a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub user: User,
    pub items: Vec<ProcessedItem>,
    /// Unix epoch milliseconds.
    pub registered_at: i64,
}

/// Bounded slice of package records requiring a quorum of independent results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageChunk {
    id: ChunkId,
    package_id: PackageId,
    policy: PackageProcessingPolicy,
    items: Vec<Record>,
    assignees: Vec<Assignment>,
    results: Vec<ChunkResult>,
}

impl PackageChunk {
    pub(crate) fn new(
        package_id: PackageId,
        policy: PackageProcessingPolicy,
        items: Vec<Record>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            package_id,
            policy,
            items,
            assignees: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Package this chunk was carved from.
    pub fn package_id(&self) -> PackageId {
        self.package_id
    }

    pub fn policy(&self) -> &PackageProcessingPolicy {
        &self.policy
    }

    pub fn items(&self) -> &[Record] {
        &self.items
    }

    pub fn assignees(&self) -> &[Assignment] {
        &self.assignees
    }

    pub fn results(&self) -> &[ChunkResult] {
        &self.results
    }

    pub fn status(&self) -> ChunkStatus {
        ChunkStatus::from_counts(
            self.assignees.len(),
            self.results.len(),
            self.policy.group_size(),
        )
    }

    /// Number of lease slots still open in the quorum group.
    pub fn free_slots(&self) -> usize {
        self.policy.group_size().saturating_sub(self.assignees.len())
    }

    pub fn is_assignee(&self, user: &User) -> bool {
        self.assignees.iter().any(|assignment| assignment.user == *user)
    }

    pub fn has_result(&self, user: &User) -> bool {
        self.results.iter().any(|result| result.user == *user)
    }

    pub fn result_of(&self, user: &User) -> Option<&ChunkResult> {
        self.results.iter().find(|result| result.user == *user)
    }

    /// Leases the chunk to `users`, stamped with the current time.
    pub fn assign_users(&mut self, users: &[User]) -> DomainResult<()> {
        self.assign_users_at(users, now_epoch_ms())
    }

    /// Leases the chunk to `users`, stamped with `now_ms`.
    ///
    /// # Errors
    /// - `NoUsers` / `MissingUser` for an empty list or an unset user.
    /// - `GroupFull` when the quorum group cannot take all of them.
    /// - `DuplicateUser`, `AlreadyAssigned`, `ResultAlreadyRegistered` for repeated users.
    pub fn assign_users_at(&mut self, users: &[User], now_ms: i64) -> DomainResult<()> {
        if users.is_empty() {
            return Err(DomainError::NoUsers(self.id));
        }
        if users.iter().any(|user| !user.is_set()) {
            return Err(DomainError::MissingUser);
        }

        let group_size = self.policy.group_size();
        if self.assignees.len() + users.len() > group_size {
            return Err(DomainError::GroupFull {
                chunk_id: self.id,
                group_size,
                requested: users.len(),
            });
        }

        let mut seen = HashSet::with_capacity(users.len());
        for user in users {
            if !seen.insert(user.id) {
                return Err(DomainError::DuplicateUser {
                    chunk_id: self.id,
                    user_id: user.id,
                });
            }
            if self.has_result(user) {
                return Err(DomainError::ResultAlreadyRegistered {
                    chunk_id: self.id,
                    user_id: user.id,
                });
            }
            if self.is_assignee(user) {
                return Err(DomainError::AlreadyAssigned {
                    chunk_id: self.id,
                    user_id: user.id,
                });
            }
        }

        self.assignees
            .extend(users.iter().cloned().map(|user| Assignment {
                user,
                assigned_at: now_ms,
            }));
        Ok(())
    }

    /// Releases the lease of `user`.
    ///
    /// # Errors
    /// - `MissingUser` for an unset user.
    /// - `UserNotAssigned` when `user` holds no lease.
    /// - `ResultAlreadyRegistered` when `user` already delivered a result.
    pub fn unassign_user(&mut self, user: &User) -> DomainResult<()> {
        if !user.is_set() {
            return Err(DomainError::MissingUser);
        }
        let position = self
            .assignees
            .iter()
            .position(|assignment| assignment.user == *user)
            .ok_or(DomainError::UserNotAssigned {
                chunk_id: self.id,
                user_id: user.id,
            })?;
        if self.has_result(user) {
            return Err(DomainError::ResultAlreadyRegistered {
                chunk_id: self.id,
                user_id: user.id,
            });
        }

        self.assignees.remove(position);
        Ok(())
    }

    /// Returns whether the lease of `user` ran out without a result.
    pub fn is_lease_expired(&self, user: &User, now_ms: i64) -> bool {
        if self.has_result(user) {
            return false;
        }
        let timeout_ms = self.policy.expiration_timeout_ms();
        self.assignees
            .iter()
            .find(|assignment| assignment.user == *user)
            .is_some_and(|assignment| now_ms.saturating_sub(assignment.assigned_at) > timeout_ms)
    }

    /// Releases every expired lease and returns the users that lost it.
    pub fn reclaim_expired_at(&mut self, now_ms: i64) -> Vec<User> {
        let expired: Vec<User> = self
            .assignees
            .iter()
            .filter(|assignment| self.is_lease_expired(&assignment.user, now_ms))
            .map(|assignment| assignment.user.clone())
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for user in expired {
            if self.unassign_user(&user).is_ok() {
                reclaimed.push(user);
            }
        }
        reclaimed
    }

    /// Builds a result payload applying one verdict to every record.
    pub fn to_processed(&self, mark: Mark) -> Vec<ProcessedItem> {
        self.items
            .iter()
            .cloned()
            .map(|record| ProcessedItem { record, mark })
            .collect()
    }

    pub(crate) fn record_result(
        &mut self,
        user: &User,
        items: Vec<ProcessedItem>,
        now_ms: i64,
    ) -> DomainResult<()> {
        if !user.is_set() {
            return Err(DomainError::MissingUser);
        }
        if !self.is_assignee(user) {
            return Err(DomainError::NotAnAssignee {
                chunk_id: self.id,
                user_id: user.id,
            });
        }
        if self.has_result(user) {
            return Err(DomainError::ResultAlreadyRegistered {
                chunk_id: self.id,
                user_id: user.id,
            });
        }
        if items.is_empty() {
            return Err(DomainError::EmptyResult(self.id));
        }

        self.results.push(ChunkResult {
            user: user.clone(),
            items,
            registered_at: now_ms,
        });
        Ok(())
    }

    /// Checks quorum bounds and result/assignee consistency.
    pub fn validate(&self) -> DomainResult<()> {
        self.policy.validate()?;
        let group_size = self.policy.group_size();
        if self.items.len() > self.policy.task_size() {
            return Err(DomainError::InvalidState(format!(
                "chunk {} holds {} records, task size is {}",
                self.id,
                self.items.len(),
                self.policy.task_size()
            )));
        }
        if self.assignees.len() > group_size || self.results.len() > group_size {
            return Err(DomainError::InvalidState(format!(
                "chunk {} exceeds group size {group_size}",
                self.id
            )));
        }
        let mut assignees = HashSet::with_capacity(self.assignees.len());
        if !self
            .assignees
            .iter()
            .all(|assignment| assignees.insert(assignment.user.id))
        {
            return Err(DomainError::InvalidState(format!(
                "chunk {} lists an assignee twice",
                self.id
            )));
        }
        let mut reporters = HashSet::with_capacity(self.results.len());
        for result in &self.results {
            if !reporters.insert(result.user.id) || !assignees.contains(&result.user.id) {
                return Err(DomainError::InvalidState(format!(
                    "chunk {} has an orphan or duplicate result for user {}",
                    self.id, result.user.id
                )));
            }
        }
        Ok(())
    }
}
