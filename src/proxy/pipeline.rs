use super::hooks::ProxyHooks;
use super::synthesizer;
use crate::error::TransportError;
use crate::transport::{strip_hop_by_hop, Upstream};
use bytes::Bytes;
use http::header::HOST;
use http::{Method, Request, Response, StatusCode};

/// Runs one request through the hooks: answer locally if `on_accept` can,
/// otherwise rewrite, dispatch upstream and annotate the response.
///
/// Holds no per-request state, so one pipeline serves every connection.
pub struct InterceptionPipeline<H, U> {
    hooks: H,
    upstream: U,
}

impl<H: ProxyHooks, U: Upstream> InterceptionPipeline<H, U> {
    pub fn new(hooks: H, upstream: U) -> Self {
        Self { hooks, upstream }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub async fn handle(&self, mut req: Request<Bytes>) -> Response<Bytes> {
        if req.method() == Method::CONNECT {
            let authority = req
                .uri()
                .authority()
                .map(|a| a.to_string())
                .unwrap_or_default();
            return self.hooks.on_connect(&authority);
        }

        if let Some(response) = self.hooks.on_accept(&req).await {
            return response;
        }

        strip_hop_by_hop(req.headers_mut());
        // reqwest derives Host from the rewritten URI
        req.headers_mut().remove(HOST);

        if let Err(e) = self.hooks.on_request(&mut req) {
            self.hooks.on_error("request", &e);
            return synthesizer::text(StatusCode::BAD_REQUEST, format!("{}\n", e));
        }

        match self.upstream.send(req).await {
            Ok(mut response) => {
                self.hooks.on_response(&mut response);
                response
            }
            Err(e) => {
                self.hooks.on_error("dispatch", &e);
                let status = match e {
                    TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                synthesizer::text(status, format!("{}\n", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MockCredentialExchange, TokenGrant};
    use crate::identity::ImpersonatedIdentity;
    use crate::metrics::ProxyMetrics;
    use crate::proxy::classifier::IDENTITY_PREFIX;
    use crate::proxy::hooks::{MetadataInterceptor, VIA_VALUE};
    use crate::proxy::rewriter::HostRewriter;
    use crate::proxy::synthesizer::ResponseSynthesizer;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records dispatched requests and answers 200 "upstream".
    #[derive(Default, Clone)]
    struct RecordingUpstream {
        sent: Arc<Mutex<Vec<Request<Bytes>>>>,
        fail: bool,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
            self.sent.lock().unwrap().push(req);
            if self.fail {
                return Err(TransportError::SendFailed("connection refused".into()));
            }
            Ok(Response::new(Bytes::from_static(b"upstream")))
        }
    }

    fn pipeline(
        mock: MockCredentialExchange,
        upstream: RecordingUpstream,
    ) -> InterceptionPipeline<MetadataInterceptor, RecordingUpstream> {
        let metrics = Arc::new(ProxyMetrics::new());
        let synthesizer = ResponseSynthesizer::new(
            Arc::new(ImpersonatedIdentity::new("svc@proj.iam.gserviceaccount.com").unwrap()),
            Arc::new(mock),
            Duration::from_secs(5),
            metrics.clone(),
        );
        let hooks = MetadataInterceptor::new(
            synthesizer,
            HostRewriter::new("169.254.169.254").unwrap(),
            metrics,
        );
        InterceptionPipeline::new(hooks, upstream)
    }

    fn get(uri: &str, flavor: Option<&'static str>) -> Request<Bytes> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(value) = flavor {
            builder = builder.header("Metadata-Flavor", value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_token_answered_locally() {
        let mut mock = MockCredentialExchange::new();
        mock.expect_exchange()
            .times(1)
            .returning(|_, _, _| Ok(TokenGrant::bearer("abc", "2099-01-01T00:00:00Z")));
        let upstream = RecordingUpstream::default();
        let pipeline = pipeline(mock, upstream.clone());

        let response = pipeline
            .handle(get(&format!("{}/token", IDENTITY_PREFIX), Some("Google")))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.body().as_ref(),
            br#"{"access_token":"abc","expires_in":"2099-01-01T00:00:00Z","token_type":"Bearer"}"#
        );
        assert!(response.headers().get("via").is_none());
        assert!(upstream.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_request_is_not_forwarded() {
        for flavor in [Some("banana"), None] {
            let mut mock = MockCredentialExchange::new();
            mock.expect_exchange().never();
            let upstream = RecordingUpstream::default();
            let pipeline = pipeline(mock, upstream.clone());

            let response = pipeline
                .handle(get(&format!("{}/token", IDENTITY_PREFIX), flavor))
                .await;

            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert!(upstream.sent.lock().unwrap().is_empty());
            assert_eq!(pipeline.hooks().metrics().rejected_total.get(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_action_is_forwarded_to_metadata_host() {
        let mut mock = MockCredentialExchange::new();
        mock.expect_exchange().never();
        let upstream = RecordingUpstream::default();
        let pipeline = pipeline(mock, upstream.clone());

        let response = pipeline
            .handle(get(
                &format!("http://example.com{}/unknown-action", IDENTITY_PREFIX),
                Some("Google"),
            ))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["via"], VIA_VALUE);

        let sent = upstream.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].uri().host(), Some("169.254.169.254"));
        assert_eq!(
            sent[0].uri().path(),
            format!("{}/unknown-action", IDENTITY_PREFIX)
        );
        assert_eq!(sent[0].headers()["metadata-flavor"], "Google");
    }

    #[tokio::test]
    async fn test_any_destination_is_rewritten() {
        let upstream = RecordingUpstream::default();
        let pipeline = pipeline(MockCredentialExchange::new(), upstream.clone());

        let mut req = get("http://example.com/foo", None);
        req.headers_mut()
            .insert(HOST, http::HeaderValue::from_static("example.com"));
        req.headers_mut().insert(
            "proxy-connection",
            http::HeaderValue::from_static("keep-alive"),
        );
        pipeline.handle(req).await;

        let sent = upstream.sent.lock().unwrap();
        assert_eq!(sent[0].uri().to_string(), "http://169.254.169.254/foo");
        assert!(sent[0].headers().get(HOST).is_none());
        assert!(sent[0].headers().get("proxy-connection").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_bad_gateway() {
        let upstream = RecordingUpstream {
            fail: true,
            ..Default::default()
        };
        let pipeline = pipeline(MockCredentialExchange::new(), upstream);

        let response = pipeline.handle(get("/foo", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get("via").is_none());
        assert_eq!(pipeline.hooks().metrics().upstream_errors_total.get(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_refused() {
        let upstream = RecordingUpstream::default();
        let pipeline = pipeline(MockCredentialExchange::new(), upstream.clone());

        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("example.com:443")
            .body(Bytes::new())
            .unwrap();
        let response = pipeline.handle(req).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(upstream.sent.lock().unwrap().is_empty());
    }
}
