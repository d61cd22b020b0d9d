//! Outcome types shared by every lock-protected mutation.
//!
//! Contention is an expected result, not an error: callers are told the
//! resource was busy and may retry. Failures carry a domain [`Error`].

use serde::{Deserialize, Serialize};

use crate::domain::Error;

/// Why a mutation was turned away without being attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum Contention {
    /// Another writer held the scope for the whole lock wait.
    LockBusy {
        /// Contended scope.
        scope: String,
    },
    /// An identical reaction toggle is already in flight.
    ToggleInFlight {
        /// Guard key of the in-flight toggle.
        scope: String,
    },
}

/// Applied value or contention.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    /// The mutation committed (or resolved to a no-op) and produced `T`.
    Applied(T),
    /// The mutation was not attempted because the resource was busy.
    Contended(Contention),
}

impl<T> MutationOutcome<T> {
    /// Applied value, if any.
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Contended(_) => None,
        }
    }

    /// Whether the mutation hit contention.
    pub fn is_contended(&self) -> bool {
        matches!(self, Self::Contended(_))
    }

    /// Transform the applied value.
    pub fn map<U>(self, map: impl FnOnce(T) -> U) -> MutationOutcome<U> {
        match self {
            Self::Applied(value) => MutationOutcome::Applied(map(value)),
            Self::Contended(contention) => MutationOutcome::Contended(contention),
        }
    }
}

/// Result of a lock-protected mutation.
pub type MutationResult<T> = Result<MutationOutcome<T>, Error>;

/// Serialisable envelope handed back to callers.
///
/// # Examples
/// ```
/// use formboard::domain::mutation::{MutationOutcome, MutationResponse};
///
/// let response = MutationResponse::from(Ok::<_, formboard::domain::Error>(
///     MutationOutcome::Applied(3_u32),
/// ));
/// assert!(response.success);
/// assert_eq!(response.value, Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse<T> {
    /// Whether the mutation was applied.
    pub success: bool,
    /// Applied value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    /// Contention details when the resource was busy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contention: Option<Contention>,
    /// Failure details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    /// Whether repeating the same request later may succeed.
    pub retryable: bool,
}

impl<T> From<MutationResult<T>> for MutationResponse<T> {
    fn from(result: MutationResult<T>) -> Self {
        match result {
            Ok(MutationOutcome::Applied(value)) => Self {
                success: true,
                value: Some(value),
                contention: None,
                error: None,
                retryable: false,
            },
            Ok(MutationOutcome::Contended(contention)) => Self {
                success: false,
                value: None,
                contention: Some(contention),
                error: None,
                retryable: true,
            },
            Err(error) => Self {
                success: false,
                value: None,
                retryable: error.code().is_transient(),
                contention: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn contention_serialises_as_retryable_failure() {
        let response = MutationResponse::<u32>::from(Ok(MutationOutcome::Contended(
            Contention::LockBusy {
                scope: "record:42".to_owned(),
            },
        )));

        assert_eq!(
            serde_json::to_value(&response).expect("serialise"),
            json!({
                "success": false,
                "contention": {"reason": "lockBusy", "scope": "record:42"},
                "retryable": true
            })
        );
    }

    #[rstest]
    #[case(Error::unavailable("sheets down"), true)]
    #[case(Error::degraded("circuit open"), false)]
    #[case(Error::conflict("id taken"), false)]
    fn errors_report_retryability_by_code(#[case] error: Error, #[case] retryable: bool) {
        let response = MutationResponse::<u32>::from(Err(error));
        assert!(!response.success);
        assert_eq!(response.retryable, retryable);
    }

    #[rstest]
    fn outcome_helpers_expose_applied_values() {
        let applied = MutationOutcome::Applied(2_u32).map(|value| value * 2);
        assert!(!applied.is_contended());
        assert_eq!(applied.applied(), Some(4));
    }
}
