//! Package aggregate.
//!
//! # Responsibility
//! - Own the remaining raw records and the chunks carved from them.
//! - Route worker results to the right chunk and derive package closure.
//!
//! # Invariants
//! - Raw records leave `raw_data` only through `create_chunk()`, in original order.
//! - `is_closed()` is `raw_data.is_empty() && every chunk is Completed`.
//! - `version` tracks the persisted revision and is not part of the body.

use super::chunk::{ChunkId, ChunkStatus, PackageChunk, ProcessedChunk, Record};
use super::error::{DomainError, DomainResult};
use super::now_epoch_ms;
use super::policy::PackageProcessingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Stable package identifier.
pub type PackageId = Uuid;

/// Batch of raw records plus its processing policy, lazily split into chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    id: PackageId,
    policy: PackageProcessingPolicy,
    raw_data: VecDeque<Record>,
    chunks: Vec<PackageChunk>,
    /// Unix epoch milliseconds.
    created_at: i64,
    #[serde(skip)]
    version: u64,
}

impl Package {
    /// Creates an unsaved package holding every record as raw data.
    pub fn new(records: Vec<Record>, policy: PackageProcessingPolicy) -> Self {
        Self::with_id(Uuid::new_v4(), records, policy, now_epoch_ms())
    }

    /// Creates an unsaved package with caller-provided identity and creation time.
    pub fn with_id(
        id: PackageId,
        records: Vec<Record>,
        policy: PackageProcessingPolicy,
        created_at: i64,
    ) -> Self {
        Self {
            id,
            policy,
            raw_data: records.into(),
            chunks: Vec::new(),
            created_at,
            version: 0,
        }
    }

    pub fn id(&self) -> PackageId {
        self.id
    }

    pub fn policy(&self) -> &PackageProcessingPolicy {
        &self.policy
    }

    /// Records not yet carved into chunks.
    pub fn raw_data(&self) -> &VecDeque<Record> {
        &self.raw_data
    }

    pub fn has_raw_data(&self) -> bool {
        !self.raw_data.is_empty()
    }

    pub fn chunks(&self) -> &[PackageChunk] {
        &self.chunks
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Persisted revision this copy was loaded at; `0` means never saved.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn is_closed(&self) -> bool {
        self.raw_data.is_empty()
            && self
                .chunks
                .iter()
                .all(|chunk| chunk.status() == ChunkStatus::Completed)
    }

    pub fn chunk(&self, chunk_id: ChunkId) -> Option<&PackageChunk> {
        self.chunks.iter().find(|chunk| chunk.id() == chunk_id)
    }

    pub fn chunk_mut(&mut self, chunk_id: ChunkId) -> Option<&mut PackageChunk> {
        self.chunks.iter_mut().find(|chunk| chunk.id() == chunk_id)
    }

    /// Moves up to `task_size` raw records into a new, unassigned chunk.
    ///
    /// # Errors
    /// - `DomainError::RawDataExhausted` when no raw records remain.
    pub fn create_chunk(&mut self) -> DomainResult<&mut PackageChunk> {
        if self.raw_data.is_empty() {
            return Err(DomainError::RawDataExhausted(self.id));
        }

        let take = self.policy.task_size().min(self.raw_data.len());
        let items: Vec<Record> = self.raw_data.drain(..take).collect();
        self.chunks
            .push(PackageChunk::new(self.id, self.policy, items));
        let last = self.chunks.len() - 1;
        Ok(&mut self.chunks[last])
    }

    /// Stores a worker's result on its chunk.
    ///
    /// Persistence stays with the caller.
    ///
    /// # Errors
    /// - `ChunkNotFound` for an unknown `chunk_id`.
    /// - `NotAnAssignee` / `ResultAlreadyRegistered` for users without a live lease.
    /// - `EmptyResult` when the payload has no items.
    pub fn register_result(&mut self, processed: &ProcessedChunk) -> DomainResult<()> {
        self.register_result_at(processed, now_epoch_ms())
    }

    pub fn register_result_at(
        &mut self,
        processed: &ProcessedChunk,
        now_ms: i64,
    ) -> DomainResult<()> {
        let chunk = self
            .chunk_mut(processed.chunk_id)
            .ok_or(DomainError::ChunkNotFound(processed.chunk_id))?;
        chunk.record_result(&processed.user, processed.items.clone(), now_ms)
    }

    /// Releases every lease that ran out without a result.
    ///
    /// Returns the number of reclaimed leases.
    pub fn reclaim_expired_leases(&mut self, now_ms: i64) -> usize {
        self.chunks
            .iter_mut()
            .map(|chunk| chunk.reclaim_expired_at(now_ms).len())
            .sum()
    }

    /// Checks policy bounds and every chunk invariant.
    pub fn validate(&self) -> DomainResult<()> {
        self.policy.validate()?;
        for chunk in &self.chunks {
            if chunk.package_id() != self.id {
                return Err(DomainError::InvalidState(format!(
                    "chunk {} belongs to package {}, found in {}",
                    chunk.id(),
                    chunk.package_id(),
                    self.id
                )));
            }
            chunk.validate()?;
        }
        Ok(())
    }
}
