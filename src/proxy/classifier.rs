//! Decides which requests the proxy answers itself.

use http::{HeaderMap, Method};

/// Path prefix of the default service account on the metadata server.
pub const IDENTITY_PREFIX: &str = "/computeMetadata/v1/instance/service-accounts/default";

pub const METADATA_FLAVOR: &str = "metadata-flavor";
pub const METADATA_FLAVOR_VALUE: &str = "Google";

/// Action named by the last path segment under [`IDENTITY_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataAction {
    Token,
    Email,
    /// Anything else; proxied to the real metadata server
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Ordinary traffic, send upstream
    Forward,
    /// Identity request without a valid `Metadata-Flavor` header
    Reject,
    Local(MetadataAction),
}

/// Classify a request by method, path and headers.
///
/// The `Metadata-Flavor` gate is checked before the action segment, so an
/// identity request without the header is rejected even when its action would
/// have been forwarded.
pub fn classify(method: &Method, path: &str, headers: &HeaderMap) -> InterceptDecision {
    if method != Method::GET || !path.starts_with(IDENTITY_PREFIX) {
        return InterceptDecision::Forward;
    }

    if !has_metadata_flavor(headers) {
        return InterceptDecision::Reject;
    }

    let action = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    InterceptDecision::Local(match action {
        "token" => MetadataAction::Token,
        "email" => MetadataAction::Email,
        other => MetadataAction::Unsupported(other.to_string()),
    })
}

fn has_metadata_flavor(headers: &HeaderMap) -> bool {
    headers
        .get(METADATA_FLAVOR)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(METADATA_FLAVOR_VALUE))
}
