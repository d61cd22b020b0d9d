//! Names of mutual-exclusion scopes.
//!
//! Scope names are derived from the entity a critical section protects, so
//! two writers of the same entity always contend on the same name.

use thiserror::Error;

use crate::domain::reaction::ReactionTarget;
use crate::domain::user_record::{Email, RecordId};

/// Name of a lock scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockName(String);

impl LockName {
    /// Build a lock name from raw text.
    pub fn new(value: impl Into<String>) -> Result<Self, LockNameValidationError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(LockNameValidationError::Empty);
        }
        if raw.trim() != raw {
            return Err(LockNameValidationError::ContainsWhitespace);
        }
        Ok(Self(raw))
    }

    /// Scope serialising every write to one record.
    pub fn record(id: &RecordId) -> Self {
        Self(format!("record:{id}"))
    }

    /// Scope serialising create-if-absent attempts for one email.
    ///
    /// The email is fingerprinted so the name never carries the address.
    pub fn create_barrier(email: &Email) -> Self {
        Self(format!("create:{}", email.fingerprint()))
    }

    /// Scope serialising reaction writes to one sheet row.
    pub fn reaction_row(target: &ReactionTarget) -> Self {
        Self(format!(
            "reaction:{}:{}",
            target.sheet().replace(char::is_whitespace, "_"),
            target.row()
        ))
    }

    /// Borrow the underlying name.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Display for LockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation errors returned when constructing [`LockName`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockNameValidationError {
    /// Name is empty after trimming whitespace.
    #[error("lock name must not be empty")]
    Empty,
    /// Name contains leading or trailing whitespace.
    #[error("lock name must not contain surrounding whitespace")]
    ContainsWhitespace,
}
