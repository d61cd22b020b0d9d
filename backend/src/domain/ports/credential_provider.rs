//! Port abstraction for obtaining bearer tokens for the sheet service.

use async_trait::async_trait;
use zeroize::Zeroizing;

use super::define_port_error;
use crate::domain::resilience::{FailureClass, RemoteFailure};

/// Access token presented to the sheet service. The secret is wiped from
/// memory on drop and never printed by `Debug`.
#[derive(Clone)]
pub struct BearerToken(Zeroizing<String>);

impl BearerToken {
    /// Wrap a raw token.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Zeroizing::new(raw.into()))
    }

    /// Borrow the secret for inclusion in an `Authorization` header.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

define_port_error! {
    /// Errors raised while obtaining credentials.
    pub enum CredentialError {
        /// The credential source is temporarily unreachable.
        Unavailable { message: String } => "credentials unavailable: {message}",
        /// The credential source refused to issue a token.
        Rejected { message: String } => "credentials rejected: {message}",
        /// No credentials are configured.
        Missing => "no credentials configured",
    }
}

impl RemoteFailure for CredentialError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Unavailable { .. } => FailureClass::Transient,
            Self::Rejected { .. } => FailureClass::PermissionDenied,
            Self::Missing => FailureClass::Permanent,
        }
    }
}

/// Source of bearer tokens.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a token valid for at least one request.
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError>;
}
