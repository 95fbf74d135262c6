use super::{lifetime_param, CredentialExchange, SourceCredentials, TokenGrant};
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::identity::ImpersonatedIdentity;
use async_trait::async_trait;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    lifetime: String,
    scope: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
    access_token: String,
    #[serde(default)]
    expire_time: String,
}

/// Client for `iamcredentials.googleapis.com`.
///
/// Each call authorizes as the proxy itself ("initialize") and then asks the
/// API for a token of the impersonated account ("generate"). Source
/// credentials are built on first use and kept; a failed build is retried on
/// the next call.
pub struct IamCredentialsClient {
    endpoint: String,
    config: ExchangeConfig,
    metadata_root: String,
    source: OnceCell<SourceCredentials>,
    http: reqwest::Client,
}

impl IamCredentialsClient {
    pub fn new(config: ExchangeConfig, metadata_root: impl Into<String>) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            config,
            metadata_root: metadata_root.into(),
            source: OnceCell::new(),
            http: reqwest::Client::new(),
        }
    }

    async fn initialize(&self) -> Result<HeaderMap, ExchangeError> {
        let source = self
            .source
            .get_or_try_init(|| async {
                let source = SourceCredentials::resolve(&self.config, &self.metadata_root)?;
                tracing::debug!(source = source.kind(), "Resolved source credentials");
                Ok::<_, ExchangeError>(source)
            })
            .await?;
        source.authorization().await
    }

    fn generate_url(&self, identity: &ImpersonatedIdentity) -> String {
        format!(
            "{}/v1/{}:generateAccessToken",
            self.endpoint,
            identity.resource_name()
        )
    }
}

#[async_trait]
impl CredentialExchange for IamCredentialsClient {
    async fn exchange(
        &self,
        identity: &ImpersonatedIdentity,
        lifetime: Duration,
        scopes: &[String],
    ) -> Result<TokenGrant, ExchangeError> {
        if identity.name().trim().is_empty() {
            return Err(ExchangeError::InvalidIdentity(identity.name().to_string()));
        }

        let authorization = self.initialize().await?;

        let body = GenerateAccessTokenRequest {
            lifetime: lifetime_param(lifetime),
            scope: scopes,
        };

        let url = self.generate_url(identity);
        tracing::debug!(url = %url, "Calling generateAccessToken");

        let response = self
            .http
            .post(&url)
            .headers(authorization)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::Generate(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Generate(format!(
                "status {}: {}",
                status,
                text.trim()
            )));
        }

        let token: GenerateAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Generate(format!("invalid response: {e}")))?;

        if token.access_token.is_empty() {
            return Err(ExchangeError::Generate("empty access token in response".into()));
        }

        Ok(TokenGrant::bearer(token.access_token, token.expire_time))
    }
}
