use super::{strip_hop_by_hop, Upstream};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use std::time::Duration;

/// Plain HTTP forwarding through reqwest.
///
/// Redirects are returned to the caller untouched and environment proxy
/// settings are ignored, so a request never loops back into this proxy.
pub struct HttpUpstream {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::SendFailed(format!("failed to build client: {e}")))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
        let (parts, body) = req.into_parts();
        let url = parts.uri.to_string();

        let response = self
            .client
            .request(parts.method, &url)
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::ReceiveFailed(e.to_string())
            }
        })?;

        let mut forwarded = Response::new(body);
        *forwarded.status_mut() = status;
        *forwarded.headers_mut() = headers;
        Ok(forwarded)
    }
}
