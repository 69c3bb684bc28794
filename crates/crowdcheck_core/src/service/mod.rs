//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into leasing and query use-cases.
//! - Stay storage-agnostic: services depend on `PackageRepository`, not SQLite.

pub mod package_manager;
pub mod task_manager;
