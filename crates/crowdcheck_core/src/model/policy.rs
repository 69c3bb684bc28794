//! Per-package processing policy.

use super::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TASK_SIZE: usize = 10;
const DEFAULT_GROUP_SIZE: usize = 2;
const DEFAULT_EXPIRATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Chunk size, quorum size and lease lifetime of one package.
///
/// Attached at package creation and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageProcessingPolicy {
    task_size: usize,
    group_size: usize,
    expiration_timeout: Duration,
}

impl PackageProcessingPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    /// - `DomainError::InvalidPolicy` when `task_size == 0` or `group_size == 0`.
    pub fn new(
        task_size: usize,
        group_size: usize,
        expiration_timeout: Duration,
    ) -> DomainResult<Self> {
        let policy = Self {
            task_size,
            group_size,
            expiration_timeout,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Maximum number of records in one chunk.
    pub fn task_size(&self) -> usize {
        self.task_size
    }

    /// Number of independent results required to complete a chunk.
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Lease lifetime of an assignment without a result.
    pub fn expiration_timeout(&self) -> Duration {
        self.expiration_timeout
    }

    /// Lease lifetime in epoch-millisecond units, saturating at `i64::MAX`.
    pub fn expiration_timeout_ms(&self) -> i64 {
        i64::try_from(self.expiration_timeout.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.task_size == 0 {
            return Err(DomainError::InvalidPolicy(
                "task_size must be greater than zero".to_string(),
            ));
        }
        if self.group_size == 0 {
            return Err(DomainError::InvalidPolicy(
                "group_size must be at least one".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PackageProcessingPolicy {
    fn default() -> Self {
        Self {
            task_size: DEFAULT_TASK_SIZE,
            group_size: DEFAULT_GROUP_SIZE,
            expiration_timeout: DEFAULT_EXPIRATION_TIMEOUT,
        }
    }
}
