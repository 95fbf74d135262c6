//! Extension points of the interception pipeline.

use super::classifier::{classify, InterceptDecision};
use super::rewriter::HostRewriter;
use super::synthesizer::{self, ResponseSynthesizer};
use crate::error::TransportError;
use crate::metrics::ProxyMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderValue, VIA};
use http::{Request, Response, StatusCode};
use std::sync::Arc;

pub const VIA_VALUE: &str = "gce-impersonation-proxy";

/// Hook points called by [`InterceptionPipeline`](super::InterceptionPipeline),
/// in order: `on_accept`, `on_request`, `on_response`. `on_error` reports any
/// failure after `on_accept`.
#[async_trait]
pub trait ProxyHooks: Send + Sync + 'static {
    /// Answer the request locally. `None` lets it continue to forwarding.
    async fn on_accept(&self, req: &Request<Bytes>) -> Option<Response<Bytes>>;

    /// Called for CONNECT requests, which are never tunneled.
    fn on_connect(&self, authority: &str) -> Response<Bytes> {
        tracing::debug!(authority = authority, "Refusing CONNECT");
        synthesizer::text(StatusCode::METHOD_NOT_ALLOWED, "CONNECT is not supported\n")
    }

    /// Mutate the request right before dispatch.
    fn on_request(&self, req: &mut Request<Bytes>) -> Result<(), TransportError>;

    /// Annotate a response received from upstream.
    fn on_response(&self, resp: &mut Response<Bytes>);

    fn on_error(&self, stage: &str, err: &TransportError) {
        tracing::error!("ERR: {}: {}", stage, err);
    }
}

/// Serves the identity endpoints locally and redirects everything else to the
/// metadata server.
pub struct MetadataInterceptor {
    synthesizer: ResponseSynthesizer,
    rewriter: HostRewriter,
    metrics: Arc<ProxyMetrics>,
}

impl MetadataInterceptor {
    pub fn new(
        synthesizer: ResponseSynthesizer,
        rewriter: HostRewriter,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            synthesizer,
            rewriter,
            metrics,
        }
    }

    pub fn metrics(&self) -> &ProxyMetrics {
        &self.metrics
    }
}

#[async_trait]
impl ProxyHooks for MetadataInterceptor {
    async fn on_accept(&self, req: &Request<Bytes>) -> Option<Response<Bytes>> {
        self.metrics.requests_total.inc();

        match classify(req.method(), req.uri().path(), req.headers()) {
            InterceptDecision::Forward => None,
            InterceptDecision::Reject => {
                tracing::warn!(
                    method = %req.method(),
                    path = req.uri().path(),
                    "Rejected identity request without Metadata-Flavor header"
                );
                self.metrics.rejected_total.inc();
                Some(synthesizer::reject())
            }
            InterceptDecision::Local(action) => {
                let response = self.synthesizer.respond(&action).await;
                if response.is_some() {
                    self.metrics.local_responses_total.inc();
                }
                response
            }
        }
    }

    fn on_request(&self, req: &mut Request<Bytes>) -> Result<(), TransportError> {
        self.rewriter.rewrite(req)?;
        self.metrics.forwarded_total.inc();
        Ok(())
    }

    fn on_response(&self, resp: &mut Response<Bytes>) {
        resp.headers_mut()
            .append(VIA, HeaderValue::from_static(VIA_VALUE));
    }

    fn on_error(&self, stage: &str, err: &TransportError) {
        self.metrics.upstream_errors_total.inc();
        tracing::error!("ERR: {}: {}", stage, err);
    }
}
