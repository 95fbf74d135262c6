//! Builds the responses the proxy serves on behalf of the metadata server.

use super::classifier::MetadataAction;
use crate::error::{ExchangeError, ExchangeStage};
use crate::exchange::{default_scopes, CredentialExchange, TokenGrant, TOKEN_LIFETIME};
use crate::identity::ImpersonatedIdentity;
use crate::metrics::ProxyMetrics;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const MISSING_FLAVOR_BODY: &str = "Missing Metadata-Flavor:Google header.\n";

/// Token payload in the metadata server's format.
///
/// `expires_in` carries the absolute expiry timestamp returned by the IAM API,
/// not a number of seconds. Existing clients depend on this.
#[derive(Debug, Serialize)]
struct TokenResponse {
    #[serde(skip_serializing_if = "String::is_empty")]
    access_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    expires_in: String,
    #[serde(skip_serializing_if = "str::is_empty")]
    token_type: &'static str,
}

impl From<TokenGrant> for TokenResponse {
    fn from(grant: TokenGrant) -> Self {
        Self {
            access_token: grant.access_token,
            expires_in: grant.expire_time,
            token_type: grant.token_type,
        }
    }
}

pub struct ResponseSynthesizer {
    identity: Arc<ImpersonatedIdentity>,
    exchange: Arc<dyn CredentialExchange>,
    timeout: Duration,
    metrics: Arc<ProxyMetrics>,
}

impl ResponseSynthesizer {
    pub fn new(
        identity: Arc<ImpersonatedIdentity>,
        exchange: Arc<dyn CredentialExchange>,
        timeout: Duration,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            identity,
            exchange,
            timeout,
            metrics,
        }
    }

    /// Produce the local response for `action`, or `None` when the request
    /// should go to the real metadata server.
    pub async fn respond(&self, action: &MetadataAction) -> Option<Response<Bytes>> {
        match action {
            MetadataAction::Token => Some(self.token().await),
            MetadataAction::Email => Some(text(StatusCode::OK, self.identity.name().to_string())),
            MetadataAction::Unsupported(action) => {
                tracing::debug!(action = %action, "Unsupported identity action, forwarding");
                None
            }
        }
    }

    async fn token(&self) -> Response<Bytes> {
        let started = Instant::now();
        let scopes = default_scopes();

        let result = tokio::time::timeout(
            self.timeout,
            self.exchange
                .exchange(&self.identity, TOKEN_LIFETIME, &scopes),
        )
        .await
        .unwrap_or(Err(ExchangeError::Timeout(self.timeout)));

        self.metrics
            .record_exchange(started.elapsed(), result.is_ok());

        match result {
            Ok(grant) => {
                tracing::info!(
                    identity = %self.identity,
                    expires = %grant.expire_time,
                    "Issued impersonated token"
                );
                match serde_json::to_vec(&TokenResponse::from(grant)) {
                    Ok(body) => Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Bytes::from(body))
                        .unwrap_or_else(|_| internal_error()),
                    Err(e) => text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("Failed to encode token: {}\n", e),
                    ),
                }
            }
            Err(e) => {
                tracing::error!(identity = %self.identity, error = %e, stage = ?e.stage(), "Credential exchange failed");
                text(StatusCode::INTERNAL_SERVER_ERROR, exchange_failure_body(&e))
            }
        }
    }
}

fn exchange_failure_body(err: &ExchangeError) -> String {
    match err.stage() {
        ExchangeStage::Initialize => {
            format!("Failed to initialize iamcredentials service: {}\n", err)
        }
        ExchangeStage::Generate => format!("Failed to generate token: {}\n", err),
    }
}

/// 403 for identity requests without the `Metadata-Flavor` header.
pub fn reject() -> Response<Bytes> {
    text(StatusCode::FORBIDDEN, MISSING_FLAVOR_BODY)
}

pub(crate) fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body.into())
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Bytes> {
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
