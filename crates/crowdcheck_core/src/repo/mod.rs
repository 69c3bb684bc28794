//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the package persistence contract used by the scheduler.
//! - Own the metadata index and the per-package locks that keep it consistent.
//!
//! # Invariants
//! - The repository is the single writer of the metadata index.
//! - Repository APIs return semantic errors (`NotFound`, `VersionConflict`) in
//!   addition to DB transport errors.

pub mod locks;
pub mod metadata;
pub mod package_repo;
