//! Reaction data model.
//!
//! Each board row stores its reactions in one cell as a JSON object mapping
//! a reaction kind to the actors who chose it, e.g.
//! `{"LIKE":["ada@example.org"],"CURIOUS":[]}`. Actor sets never hold
//! duplicates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of reaction a participant can leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionKind {
    /// "I understand".
    Understand,
    /// "I like this".
    Like,
    /// "Tell me more".
    Curious,
}

impl ReactionKind {
    /// Wire label, e.g. `LIKE`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Understand => "UNDERSTAND",
            Self::Like => "LIKE",
            Self::Curious => "CURIOUS",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReactionKind {
    type Err = ReactionValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "UNDERSTAND" => Ok(Self::Understand),
            "LIKE" => Ok(Self::Like),
            "CURIOUS" => Ok(Self::Curious),
            _ => Err(ReactionValidationError::UnknownKind {
                value: value.to_owned(),
            }),
        }
    }
}

/// Validation errors for reaction inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactionValidationError {
    /// Kind label is not recognised.
    #[error("unknown reaction kind {value}")]
    UnknownKind {
        /// Rejected label.
        value: String,
    },
    /// Intent label is not recognised.
    #[error("unknown toggle intent {value}")]
    UnknownIntent {
        /// Rejected label.
        value: String,
    },
    /// Actor identifier is blank or contains whitespace.
    #[error("actor must be non-empty and free of whitespace")]
    InvalidActor,
    /// Target sheet name is blank.
    #[error("reaction sheet name must not be empty")]
    EmptySheet,
    /// Target row is zero or the header row.
    #[error("reaction rows start below the header row; got row {row}")]
    HeaderRow {
        /// Rejected row number.
        row: u32,
    },
}

/// Participant identifier (typically a normalised email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    /// Validate an actor identifier; surrounding whitespace is trimmed.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ReactionValidationError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(ReactionValidationError::InvalidActor);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the identifier.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ActorId {
    type Error = ReactionValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ActorId> for String {
    fn from(value: ActorId) -> Self {
        value.0
    }
}

/// Row 1 of every board sheet holds column labels.
const HEADER_ROW: u32 = 1;

/// Sheet row whose reactions are being changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionTarget {
    sheet: String,
    row: u32,
}

impl ReactionTarget {
    /// Validate a target.
    pub fn new(sheet: impl Into<String>, row: u32) -> Result<Self, ReactionValidationError> {
        let sheet = sheet.into();
        if sheet.trim().is_empty() {
            return Err(ReactionValidationError::EmptySheet);
        }
        if row <= HEADER_ROW {
            return Err(ReactionValidationError::HeaderRow { row });
        }
        Ok(Self { sheet, row })
    }

    /// Sheet name.
    pub fn sheet(&self) -> &str {
        self.sheet.as_str()
    }

    /// 1-based row number, always below the header.
    pub fn row(&self) -> u32 {
        self.row
    }
}

/// What the caller wants to happen to their reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleIntent {
    /// Ensure the actor is present. Repeating it is a no-op.
    Add,
    /// Ensure the actor is absent. Repeating it is a no-op.
    Remove,
    /// Invert the current membership, as observed under the lock.
    Flip,
}

impl ToggleIntent {
    /// Desired membership given the current one.
    pub const fn resolve(self, currently_present: bool) -> bool {
        match self {
            Self::Add => true,
            Self::Remove => false,
            Self::Flip => !currently_present,
        }
    }
}

impl FromStr for ToggleIntent {
    type Err = ReactionValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "remove" => Ok(Self::Remove),
            "flip" | "toggle" => Ok(Self::Flip),
            _ => Err(ReactionValidationError::UnknownIntent {
                value: value.to_owned(),
            }),
        }
    }
}

/// A request to change one actor's reaction of one kind on one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionToggle {
    /// Row being reacted to.
    pub target: ReactionTarget,
    /// Reaction kind.
    pub kind: ReactionKind,
    /// Reacting participant.
    pub actor: ActorId,
    /// Desired change.
    pub intent: ToggleIntent,
}

/// Result of an applied toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    /// Reaction kind.
    pub kind: ReactionKind,
    /// Reacting participant.
    pub actor: ActorId,
    /// Whether the actor is now present.
    pub present: bool,
    /// Whether the stored state changed.
    pub changed: bool,
    /// Actors now holding this reaction kind.
    pub count: usize,
}

/// Stored reaction cell could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("reaction cell is malformed: {message}")]
pub struct ReactionBlobError {
    message: String,
}

/// All reactions on one row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionState(BTreeMap<ReactionKind, BTreeSet<ActorId>>);

impl ReactionState {
    /// Parse a stored cell. Blank cells hold no reactions.
    pub fn from_blob(blob: &str) -> Result<Self, ReactionBlobError> {
        if blob.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(blob).map_err(|error| ReactionBlobError {
            message: error.to_string(),
        })
    }

    /// Serialise for storage, omitting kinds nobody holds.
    pub fn to_blob(&self) -> String {
        let populated: BTreeMap<_, _> = self
            .0
            .iter()
            .filter(|(_, actors)| !actors.is_empty())
            .collect();
        // Maps with string-like keys always serialise.
        serde_json::to_string(&populated).unwrap_or_else(|_| "{}".to_owned())
    }

    /// Whether `actor` holds `kind`.
    pub fn contains(&self, kind: ReactionKind, actor: &ActorId) -> bool {
        self.0.get(&kind).is_some_and(|actors| actors.contains(actor))
    }

    /// Number of actors holding `kind`.
    pub fn count(&self, kind: ReactionKind) -> usize {
        self.0.get(&kind).map_or(0, BTreeSet::len)
    }

    /// Set membership of `actor` in `kind`. Returns whether anything
    /// changed.
    pub fn set(&mut self, kind: ReactionKind, actor: &ActorId, present: bool) -> bool {
        if present {
            self.0.entry(kind).or_default().insert(actor.clone())
        } else {
            self.0
                .get_mut(&kind)
                .is_some_and(|actors| actors.remove(actor))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn ada() -> ActorId {
        ActorId::new("ada@example.org").expect("valid actor")
    }

    #[rstest]
    fn blank_cells_hold_no_reactions() {
        let state = ReactionState::from_blob("  ").expect("blank is valid");
        assert_eq!(state, ReactionState::default());
        assert_eq!(state.to_blob(), "{}");
    }

    #[rstest]
    fn set_is_idempotent(ada: ActorId) {
        let mut state = ReactionState::default();

        assert!(state.set(ReactionKind::Like, &ada, true));
        assert!(!state.set(ReactionKind::Like, &ada, true));
        assert_eq!(state.count(ReactionKind::Like), 1);

        assert!(state.set(ReactionKind::Like, &ada, false));
        assert!(!state.set(ReactionKind::Like, &ada, false));
        assert_eq!(state.count(ReactionKind::Like), 0);
    }

    #[rstest]
    fn blob_round_trip_omits_empty_kinds(ada: ActorId) {
        let mut state =
            ReactionState::from_blob(r#"{"LIKE":["grace@example.org"],"CURIOUS":[]}"#)
                .expect("valid blob");
        state.set(ReactionKind::Like, &ada, true);

        assert_eq!(
            state.to_blob(),
            r#"{"LIKE":["ada@example.org","grace@example.org"]}"#
        );
        assert!(state.contains(ReactionKind::Like, &ada));
        assert!(!state.contains(ReactionKind::Curious, &ada));
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"LOVE":["ada@example.org"]}"#)]
    #[case(r#"{"LIKE":"ada@example.org"}"#)]
    fn malformed_blobs_are_rejected(#[case] blob: &str) {
        assert!(ReactionState::from_blob(blob).is_err());
    }

    #[rstest]
    #[case(ToggleIntent::Add, false, true)]
    #[case(ToggleIntent::Add, true, true)]
    #[case(ToggleIntent::Remove, true, false)]
    #[case(ToggleIntent::Flip, true, false)]
    #[case(ToggleIntent::Flip, false, true)]
    fn intents_resolve_against_current_membership(
        #[case] intent: ToggleIntent,
        #[case] present: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(intent.resolve(present), expected);
    }

    #[rstest]
    #[case("like", ReactionKind::Like)]
    #[case(" Curious ", ReactionKind::Curious)]
    #[case("UNDERSTAND", ReactionKind::Understand)]
    fn kinds_parse_case_insensitively(#[case] raw: &str, #[case] expected: ReactionKind) {
        assert_eq!(raw.parse::<ReactionKind>().expect("known kind"), expected);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn targets_reject_rows_at_or_above_the_header(#[case] row: u32) {
        assert_eq!(
            ReactionTarget::new("Posts", row).expect_err("header row"),
            ReactionValidationError::HeaderRow { row }
        );
    }

    #[rstest]
    fn first_data_row_is_a_valid_target() {
        let target = ReactionTarget::new("Posts", 2).expect("first data row");
        assert_eq!(target.row(), 2);
    }
}
