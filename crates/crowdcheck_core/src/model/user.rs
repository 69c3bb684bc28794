//! Worker identity.
//!
//! # Invariants
//! - Equality and hashing use `id` only; `name` is display metadata.
//! - `id == 0` means "unset" and is rejected by every scheduling operation.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Identifier of a worker in the external user directory.
pub type UserId = u64;

/// Bare identity of a worker requesting or completing chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Returns whether this value carries a real identity.
    pub fn is_set(&self) -> bool {
        self.id != 0
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
