//! Credential exchange against the IAM Credentials API
//!
//! The proxy never holds long-lived keys for the impersonated account. Every
//! token request is turned into one `generateAccessToken` call authorized by
//! the proxy's own credentials.

use crate::error::ExchangeError;
use crate::identity::ImpersonatedIdentity;
use async_trait::async_trait;
use std::time::Duration;

pub mod iam;
pub mod source;

pub use iam::IamCredentialsClient;
pub use source::SourceCredentials;

/// Lifetime requested for every impersonated token.
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Scope requested for every impersonated token.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

pub const BEARER: &str = "Bearer";

pub fn default_scopes() -> Vec<String> {
    vec![CLOUD_PLATFORM_SCOPE.to_string()]
}

/// A freshly minted token for the impersonated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Expiry as returned by the API (RFC 3339 timestamp)
    pub expire_time: String,
    pub token_type: &'static str,
}

impl TokenGrant {
    pub fn bearer(access_token: impl Into<String>, expire_time: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expire_time: expire_time.into(),
            token_type: BEARER,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialExchange: Send + Sync + 'static {
    /// Mint a token for `identity`. One attempt, no retries.
    async fn exchange(
        &self,
        identity: &ImpersonatedIdentity,
        lifetime: Duration,
        scopes: &[String],
    ) -> Result<TokenGrant, ExchangeError>;
}

/// Serialize a lifetime the way the IAM API expects it, e.g. `3600s`.
pub(crate) fn lifetime_param(lifetime: Duration) -> String {
    format!("{}s", lifetime.as_secs())
}
