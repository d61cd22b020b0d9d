//! Credential providers for the sheet service.

use async_trait::async_trait;

use crate::domain::ports::{BearerToken, CredentialError, CredentialProvider};

/// Hands out one preconfigured token.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    token: Option<BearerToken>,
}

impl StaticCredentialProvider {
    /// Provider for `token`; blank tokens count as missing.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token
                .filter(|raw| !raw.trim().is_empty())
                .map(BearerToken::new),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn bearer_token(&self) -> Result<BearerToken, CredentialError> {
        self.token.clone().ok_or_else(CredentialError::missing)
    }
}
