//! Cached metadata index over stored packages.
//!
//! # Responsibility
//! - Keep package ids in creation order with an open/closed flag.
//! - Answer statistics and "earliest open package" without loading bodies.
//!
//! # Invariants
//! - Entries stay sorted by `(created_at, seq)`.
//! - Only the repository mutates the index, and only after a committed write.
//! - `reset()` empties the cache; the repository reloads it from durable state.

use crate::model::package::PackageId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One package as seen by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub package_id: PackageId,
    /// Durable insertion sequence; breaks ties between equal `created_at`.
    pub seq: i64,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    pub closed: bool,
}

/// Open/closed package counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackageStatistics {
    pub opened_packages: usize,
    pub closed_packages: usize,
}

impl PackageStatistics {
    pub fn total(&self) -> usize {
        self.opened_packages + self.closed_packages
    }
}

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<IndexEntry>,
    positions: HashMap<PackageId, usize>,
}

impl IndexState {
    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.package_id, position))
            .collect();
    }
}

/// Creation-ordered package index shared by the repository and managers.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    state: RwLock<IndexState>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached entry.
    pub fn reset(&self) {
        let mut state = self.write();
        state.entries.clear();
        state.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn entry(&self, package_id: PackageId) -> Option<IndexEntry> {
        let state = self.read();
        state
            .positions
            .get(&package_id)
            .map(|&position| state.entries[position])
    }

    /// Ids of open packages, oldest first.
    pub fn open_ids_in_creation_order(&self) -> Vec<PackageId> {
        self.read()
            .entries
            .iter()
            .filter(|entry| !entry.closed)
            .map(|entry| entry.package_id)
            .collect()
    }

    /// Oldest open package, if any.
    pub fn first_open(&self) -> Option<PackageId> {
        self.read()
            .entries
            .iter()
            .find(|entry| !entry.closed)
            .map(|entry| entry.package_id)
    }

    pub fn statistics(&self) -> PackageStatistics {
        let state = self.read();
        let closed_packages = state.entries.iter().filter(|entry| entry.closed).count();
        PackageStatistics {
            opened_packages: state.entries.len() - closed_packages,
            closed_packages,
        }
    }

    /// Inserts a new entry in creation order, or refreshes the closed flag of a known one.
    pub(crate) fn upsert(&self, entry: IndexEntry) {
        let mut state = self.write();
        if let Some(&position) = state.positions.get(&entry.package_id) {
            state.entries[position].closed = entry.closed;
            return;
        }

        let key = (entry.created_at, entry.seq);
        let position = state
            .entries
            .partition_point(|existing| (existing.created_at, existing.seq) <= key);
        state.entries.insert(position, entry);
        state.reindex();
    }

    /// Replaces the cache with durable entries.
    pub(crate) fn load(&self, mut entries: Vec<IndexEntry>) {
        entries.sort_by_key(|entry| (entry.created_at, entry.seq));
        let mut state = self.write();
        state.entries = entries;
        state.reindex();
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
