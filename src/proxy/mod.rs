//! Metadata server proxy
//!
//! Requests for the default service account's `token` and `email` are answered
//! locally on behalf of the impersonated identity. Everything else, including
//! unrecognized identity actions, is redirected to the real metadata server
//! regardless of where the client addressed it.

use crate::config::Config;
use crate::error::Result;
use crate::exchange::CredentialExchange;
use crate::identity::ImpersonatedIdentity;
use crate::metrics::ProxyMetrics;
use crate::transport::HttpUpstream;
use std::sync::Arc;

pub mod classifier;
pub mod hooks;
pub mod pipeline;
pub mod rewriter;
pub mod server;
pub mod synthesizer;

pub use classifier::{classify, InterceptDecision, MetadataAction};
pub use hooks::{MetadataInterceptor, ProxyHooks};
pub use pipeline::InterceptionPipeline;
pub use rewriter::HostRewriter;
pub use server::ProxyServer;
pub use synthesizer::ResponseSynthesizer;

pub type MetadataPipeline = InterceptionPipeline<MetadataInterceptor, HttpUpstream>;

/// Wire the pipeline used by the binary from configuration.
pub fn build_pipeline(
    config: &Config,
    identity: Arc<ImpersonatedIdentity>,
    exchange: Arc<dyn CredentialExchange>,
    metrics: Arc<ProxyMetrics>,
) -> Result<MetadataPipeline> {
    let synthesizer = ResponseSynthesizer::new(
        identity,
        exchange,
        config.exchange_timeout(),
        metrics.clone(),
    );
    let rewriter = HostRewriter::new(&config.metadata_host)?;
    let hooks = MetadataInterceptor::new(synthesizer, rewriter, metrics);
    let upstream = HttpUpstream::new(config.upstream_timeout())?;

    Ok(InterceptionPipeline::new(hooks, upstream))
}
