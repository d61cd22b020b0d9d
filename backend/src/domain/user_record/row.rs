//! Sheet row encoding for user records.
//!
//! Column layout: `id | email | isActive | attributes | lastModified`.
//! Attributes are stored as a JSON object string and timestamps as RFC 3339
//! with millisecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::{Attributes, Email, RecordId, UserRecord};
use crate::domain::ports::{Cell, Row};

/// Number of columns a user row occupies.
pub const USER_COLUMNS: u32 = 5;

const ID: usize = 0;
const EMAIL: usize = 1;
const IS_ACTIVE: usize = 2;
const ATTRIBUTES: usize = 3;
const LAST_MODIFIED: usize = 4;

/// Reasons a stored row cannot be read as a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowDecodeError {
    /// A required cell is empty or missing.
    #[error("column {column} is empty")]
    MissingColumn {
        /// Column name.
        column: &'static str,
    },
    /// The id or email cell fails validation.
    #[error("column {column} is invalid: {message}")]
    InvalidField {
        /// Column name.
        column: &'static str,
        /// Validation failure.
        message: String,
    },
}

/// Header row written above the first record.
pub fn header_row() -> Row {
    ["id", "email", "isActive", "attributes", "lastModified"]
        .into_iter()
        .map(Value::from)
        .collect()
}

/// Encode a record as a full row.
pub fn encode_row(record: &UserRecord) -> Row {
    vec![
        Value::String(record.id.to_string()),
        Value::String(record.email.to_string()),
        Value::Bool(record.is_active),
        Value::String(Value::Object(record.attributes.clone()).to_string()),
        Value::String(
            record
                .last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
    ]
}

/// Whether a row carries no data (unused grid space).
pub fn is_blank_row(row: &[Cell]) -> bool {
    row.iter().all(|cell| cell_text(Some(cell)).is_none())
}

/// Decode a row into a record.
pub fn decode_row(row: &[Cell]) -> Result<UserRecord, RowDecodeError> {
    let id = required(row, ID, "id")?;
    let id = RecordId::new(id).map_err(|error| invalid("id", &error))?;
    let email = required(row, EMAIL, "email")?;
    let email = Email::new(email).map_err(|error| invalid("email", &error))?;
    let is_active = decode_flag(row.get(IS_ACTIVE))?;
    let attributes = decode_attributes(row.get(ATTRIBUTES))?;
    let last_modified = required(row, LAST_MODIFIED, "lastModified")?;
    let last_modified = DateTime::parse_from_rfc3339(&last_modified)
        .map_err(|error| invalid("lastModified", &error))?
        .with_timezone(&Utc);

    Ok(UserRecord::new(id, email, is_active, attributes, last_modified))
}

fn required(row: &[Cell], index: usize, column: &'static str) -> Result<String, RowDecodeError> {
    cell_text(row.get(index)).ok_or(RowDecodeError::MissingColumn { column })
}

fn invalid(column: &'static str, error: &impl std::fmt::Display) -> RowDecodeError {
    RowDecodeError::InvalidField {
        column,
        message: error.to_string(),
    }
}

fn cell_text(cell: Option<&Cell>) -> Option<String> {
    let text = match cell? {
        Value::Null => return None,
        Value::String(text) => text.trim().to_owned(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn decode_flag(cell: Option<&Cell>) -> Result<bool, RowDecodeError> {
    match cell {
        Some(Value::Bool(flag)) => Ok(*flag),
        other => match cell_text(other).as_deref() {
            None => Ok(false),
            Some(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Some(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            Some(text) => Err(RowDecodeError::InvalidField {
                column: "isActive",
                message: format!("expected TRUE or FALSE, found {text}"),
            }),
        },
    }
}

fn decode_attributes(cell: Option<&Cell>) -> Result<Attributes, RowDecodeError> {
    match cell {
        Some(Value::Object(map)) => Ok(map.clone()),
        other => match cell_text(other) {
            None => Ok(Attributes::new()),
            Some(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(RowDecodeError::InvalidField {
                    column: "attributes",
                    message: "expected a JSON object".to_owned(),
                }),
                Err(error) => Err(invalid("attributes", &error)),
            },
        },
    }
}
