//! Domain model for quorum-verified work distribution.
//!
//! # Responsibility
//! - Define packages, chunks, users and processing policies.
//! - Keep every state transition pure: no I/O, no clocks beyond the `_at` inputs.
//!
//! # Invariants
//! - Chunk status is a pure function of assignee/result counts.
//! - A package transitions Open -> Closed at most once in normal flow.

pub mod chunk;
pub mod error;
pub mod package;
pub mod policy;
pub mod user;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
