use crate::error::TransportError;
use bytes::Bytes;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Request, Uri};

/// Points every forwarded request at the metadata server, whatever its
/// original destination was.
#[derive(Debug, Clone)]
pub struct HostRewriter {
    authority: Authority,
}

impl HostRewriter {
    pub fn new(metadata_host: &str) -> Result<Self, TransportError> {
        let authority = metadata_host
            .parse::<Authority>()
            .map_err(|e| TransportError::InvalidUri(format!("{}: {}", metadata_host, e)))?;
        Ok(Self { authority })
    }

    pub fn rewrite(&self, req: &mut Request<Bytes>) -> Result<(), TransportError> {
        let mut parts = req.uri().clone().into_parts();
        // Origin-form requests carry no scheme.
        parts.scheme = Some(parts.scheme.unwrap_or(Scheme::HTTP));
        parts.authority = Some(self.authority.clone());
        if parts.path_and_query.is_none() {
            parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }

        *req.uri_mut() =
            Uri::from_parts(parts).map_err(|e| TransportError::InvalidUri(e.to_string()))?;

        tracing::info!("Proxy: {} {}", req.method(), req.uri());
        Ok(())
    }
}
