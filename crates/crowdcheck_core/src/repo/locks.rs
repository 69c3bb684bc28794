//! Per-package mutual exclusion.
//!
//! # Invariants
//! - At most one guard per package id exists at a time.
//! - Guards for different ids never wait on each other.
//! - Dropping a guard releases the id and wakes waiters.

use crate::model::package::PackageId;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Registry of package ids currently held by a read-modify-write sequence.
#[derive(Debug, Default)]
pub struct PackageLocks {
    held: Mutex<HashSet<PackageId>>,
    released: Condvar,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until `package_id` is free, then holds it until the guard drops.
    pub fn acquire(&self, package_id: PackageId) -> PackageGuard<'_> {
        let mut held = self.held();
        while held.contains(&package_id) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(package_id);
        PackageGuard {
            locks: self,
            package_id,
        }
    }

    /// Holds `package_id` only if nobody else does.
    pub fn try_acquire(&self, package_id: PackageId) -> Option<PackageGuard<'_>> {
        let mut held = self.held();
        if !held.insert(package_id) {
            return None;
        }
        Some(PackageGuard {
            locks: self,
            package_id,
        })
    }

    pub fn is_held(&self, package_id: PackageId) -> bool {
        self.held().contains(&package_id)
    }

    fn held(&self) -> MutexGuard<'_, HashSet<PackageId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on one package id.
#[derive(Debug)]
pub struct PackageGuard<'a> {
    locks: &'a PackageLocks,
    package_id: PackageId,
}

impl PackageGuard<'_> {
    pub fn package_id(&self) -> PackageId {
        self.package_id
    }
}

impl Drop for PackageGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.package_id);
        self.locks.released.notify_all();
    }
}
