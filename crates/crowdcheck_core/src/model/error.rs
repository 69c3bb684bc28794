//! Domain error taxonomy.
//!
//! # Responsibility
//! - Describe every expected failure of chunk/package state transitions.
//! - Map each failure onto one coarse `ErrorKind` shared by all layers.
//!
//! # Invariants
//! - Domain operations never panic on expected conditions; they return these errors.
//! - A failed operation leaves the aggregate unchanged.

use super::chunk::ChunkId;
use super::package::PackageId;
use super::user::UserId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse failure category shared by domain, repository and service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or empty arguments, invalid policy, broken structural invariant.
    Validation,
    /// Unknown chunk/package id, or user is not an assignee.
    NotFound,
    /// Duplicate result, duplicate assignment, stale version.
    Conflict,
    /// Quorum group is already full.
    Capacity,
    /// Nothing left to hand out.
    Exhaustion,
    /// Persistence failure.
    Storage,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Capacity => "capacity",
            Self::Exhaustion => "exhaustion",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Failure of a chunk or package state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Policy bounds violated (`task_size > 0`, `group_size >= 1`).
    InvalidPolicy(String),
    /// User argument is unset.
    MissingUser,
    /// Assignment called with an empty user list.
    NoUsers(ChunkId),
    /// Result payload has no processed items.
    EmptyResult(ChunkId),
    ChunkNotFound(ChunkId),
    /// Unassign target holds no lease on the chunk.
    UserNotAssigned { chunk_id: ChunkId, user_id: UserId },
    /// Result submitted by a user who does not hold a lease on the chunk.
    NotAnAssignee { chunk_id: ChunkId, user_id: UserId },
    AlreadyAssigned { chunk_id: ChunkId, user_id: UserId },
    /// Same user listed twice in one assignment call.
    DuplicateUser { chunk_id: ChunkId, user_id: UserId },
    ResultAlreadyRegistered { chunk_id: ChunkId, user_id: UserId },
    GroupFull {
        chunk_id: ChunkId,
        group_size: usize,
        requested: usize,
    },
    /// No raw records left to carve a new chunk from.
    RawDataExhausted(PackageId),
    /// Aggregate violates a structural invariant (usually corrupt persisted state).
    InvalidState(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPolicy(_)
            | Self::MissingUser
            | Self::NoUsers(_)
            | Self::EmptyResult(_)
            | Self::InvalidState(_) => ErrorKind::Validation,
            Self::ChunkNotFound(_) | Self::UserNotAssigned { .. } => ErrorKind::NotFound,
            Self::NotAnAssignee { .. }
            | Self::AlreadyAssigned { .. }
            | Self::DuplicateUser { .. }
            | Self::ResultAlreadyRegistered { .. } => ErrorKind::Conflict,
            Self::GroupFull { .. } => ErrorKind::Capacity,
            Self::RawDataExhausted(_) => ErrorKind::Exhaustion,
        }
    }
}

impl Display for DomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPolicy(message) => write!(f, "invalid processing policy: {message}"),
            Self::MissingUser => write!(f, "user is not set"),
            Self::NoUsers(chunk_id) => write!(f, "no users given for chunk {chunk_id}"),
            Self::EmptyResult(chunk_id) => {
                write!(f, "result for chunk {chunk_id} contains no processed items")
            }
            Self::ChunkNotFound(chunk_id) => write!(f, "chunk not found: {chunk_id}"),
            Self::UserNotAssigned { chunk_id, user_id } => {
                write!(f, "user {user_id} is not assigned to chunk {chunk_id}")
            }
            Self::NotAnAssignee { chunk_id, user_id } => write!(
                f,
                "user {user_id} holds no lease on chunk {chunk_id}; result rejected"
            ),
            Self::AlreadyAssigned { chunk_id, user_id } => {
                write!(f, "user {user_id} is already assigned to chunk {chunk_id}")
            }
            Self::DuplicateUser { chunk_id, user_id } => write!(
                f,
                "user {user_id} listed more than once for chunk {chunk_id}"
            ),
            Self::ResultAlreadyRegistered { chunk_id, user_id } => write!(
                f,
                "user {user_id} already registered a result for chunk {chunk_id}"
            ),
            Self::GroupFull {
                chunk_id,
                group_size,
                requested,
            } => write!(
                f,
                "chunk {chunk_id} cannot take {requested} more assignee(s); group size is {group_size}"
            ),
            Self::RawDataExhausted(package_id) => {
                write!(f, "package {package_id} has no raw data left")
            }
            Self::InvalidState(message) => write!(f, "invalid aggregate state: {message}"),
        }
    }
}

impl Error for DomainError {}
