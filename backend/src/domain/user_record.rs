//! User record data model.
//!
//! Records live one per row in the users sheet. Identifiers are opaque and
//! stable; emails are compared after normalisation; `last_modified` moves
//! strictly forward on every committed write.

use std::fmt;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

mod row;

pub use row::{RowDecodeError, USER_COLUMNS, decode_row, encode_row, header_row, is_blank_row};

/// Free-form record attributes.
pub type Attributes = Map<String, Value>;

const MAX_ID_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

/// Validation errors for record fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordValidationError {
    /// Identifier is blank.
    #[error("record id must not be empty")]
    EmptyId,
    /// Identifier contains whitespace or exceeds 64 characters.
    #[error("record id must be at most 64 characters without whitespace")]
    InvalidId,
    /// Email is not of the form `local@domain`.
    #[error("email must look like local@domain")]
    InvalidEmail,
}

/// Stable opaque record identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId(String);

impl RecordId {
    /// Validate and construct a [`RecordId`].
    pub fn new(id: impl Into<String>) -> Result<Self, RecordValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(RecordValidationError::EmptyId);
        }
        if id.chars().any(char::is_whitespace) || id.chars().count() > MAX_ID_LEN {
            return Err(RecordValidationError::InvalidId);
        }
        Ok(Self(id))
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RecordId {
    type Error = RecordValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Normalised (trimmed, lowercased) email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Normalise and validate an email address.
    ///
    /// # Examples
    /// ```
    /// use formboard::domain::user_record::Email;
    ///
    /// let email = Email::new("  Ada@Example.ORG ").expect("valid email");
    /// assert_eq!(email.as_str(), "ada@example.org");
    /// ```
    pub fn new(raw: impl AsRef<str>) -> Result<Self, RecordValidationError> {
        let normalised = raw.as_ref().trim().to_lowercase();
        let Some((local, domain)) = normalised.split_once('@') else {
            return Err(RecordValidationError::InvalidEmail);
        };
        let malformed = local.is_empty()
            || domain.is_empty()
            || domain.contains('@')
            || normalised.chars().any(char::is_whitespace)
            || normalised.len() > MAX_EMAIL_LEN;
        if malformed {
            return Err(RecordValidationError::InvalidEmail);
        }
        Ok(Self(normalised))
    }

    /// Borrow the normalised address.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Hex SHA-256 of the normalised address, for names and keys that must
    /// not carry the address itself.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = RecordValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}

/// One stored user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    id: RecordId,
    email: Email,
    is_active: bool,
    attributes: Attributes,
    last_modified: DateTime<Utc>,
}

impl UserRecord {
    /// Assemble a record from its parts.
    pub fn new(
        id: RecordId,
        email: Email,
        is_active: bool,
        attributes: Attributes,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            is_active,
            attributes,
            last_modified: last_modified.trunc_subsecs(3),
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Normalised email.
    pub fn email(&self) -> &Email {
        &self.email
    }

    /// Whether the record is active. Deactivation is a soft delete.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Free-form attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Time of the last committed write, millisecond precision.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

/// Input for create-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUserRecord {
    /// Caller-chosen identifier; generated when absent.
    pub id: Option<RecordId>,
    /// Email the record is unique by.
    pub email: Email,
    /// Initial activity flag.
    pub is_active: bool,
    /// Initial attributes.
    pub attributes: Attributes,
}

impl NewUserRecord {
    /// Active record with no attributes and a generated id.
    pub fn for_email(email: Email) -> Self {
        Self {
            id: None,
            email,
            is_active: true,
            attributes: Attributes::new(),
        }
    }
}

/// Partial update. Absent fields keep their stored value; `attributes` is
/// merged into the stored attributes with JSON merge-patch semantics
/// (`null` removes a key, nested objects merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordPatch {
    /// Replacement email.
    pub email: Option<Email>,
    /// Replacement activity flag.
    pub is_active: Option<bool>,
    /// Attribute merge patch.
    pub attributes: Option<Attributes>,
}

impl RecordPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.is_active.is_none() && self.attributes.is_none()
    }

    /// Patch that only flips the activity flag off.
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Self::default()
        }
    }

    /// Apply the patch to `current`, stamping a `last_modified` strictly
    /// after the stored one.
    pub fn apply(&self, current: &UserRecord, now: DateTime<Utc>) -> UserRecord {
        let mut attributes = current.attributes.clone();
        if let Some(patch) = &self.attributes {
            merge_patch(&mut attributes, patch);
        }
        UserRecord {
            id: current.id.clone(),
            email: self.email.clone().unwrap_or_else(|| current.email.clone()),
            is_active: self.is_active.unwrap_or(current.is_active),
            attributes,
            last_modified: next_modified(current.last_modified, now),
        }
    }
}

/// Merge `patch` into `target` following RFC 7396.
pub fn merge_patch(target: &mut Attributes, patch: &Attributes) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested_patch) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(nested_target) = slot {
                    merge_patch(nested_target, nested_patch);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Timestamp for a write following one stamped `previous`: `now` at
/// millisecond precision, or one millisecond after `previous` when the
/// clock has not moved past it.
pub fn next_modified(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(3);
    if now > previous {
        now
    } else {
        previous + TimeDelta::milliseconds(1)
    }
}

#[cfg(test)]
mod tests;
