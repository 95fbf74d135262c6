//! Plain HTTP listener in front of the interception pipeline.

use super::hooks::ProxyHooks;
use super::pipeline::InterceptionPipeline;
use super::synthesizer;
use crate::error::Result;
use crate::transport::Upstream;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Largest request body the proxy buffers before forwarding.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct ProxyServer<H, U> {
    listener: TcpListener,
    pipeline: Arc<InterceptionPipeline<H, U>>,
    shutdown_grace: Duration,
}

impl<H: ProxyHooks, U: Upstream> ProxyServer<H, U> {
    pub async fn bind(
        addr: &str,
        pipeline: Arc<InterceptionPipeline<H, U>>,
        shutdown_grace: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&*listen_address(addr)).await?;
        Ok(Self {
            listener,
            pipeline,
            shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then give open connections
    /// `shutdown_grace` to finish.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        tracing::info!("Metadata proxy listening on {}", self.local_addr()?);

        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!("ERR: accept: {}", e);
                            continue;
                        }
                    };

                    let pipeline = self.pipeline.clone();
                    let service = service_fn(move |req: Request<Incoming>| {
                        let pipeline = pipeline.clone();
                        async move { Ok::<_, Infallible>(serve(pipeline, req).await) }
                    });

                    // Dropping the connection drops the in-flight request future,
                    // cancelling any exchange or upstream call it was awaiting.
                    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                    let conn = graceful.watch(conn);
                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            tracing::debug!(peer = %peer, "Connection error: {}", e);
                        }
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Metadata proxy shutting down");
                    break;
                }
            }
        }

        drop(self.listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                tracing::info!("All connections closed");
            }
            _ = tokio::time::sleep(self.shutdown_grace) => {
                tracing::warn!("Shutdown grace period elapsed with connections still open");
            }
        }

        Ok(())
    }
}

async fn serve<H: ProxyHooks, U: Upstream>(
    pipeline: Arc<InterceptionPipeline<H, U>>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            tracing::warn!("Request body exceeds {} bytes", MAX_BODY_BYTES);
            return synthesizer::text(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large\n")
                .map(Full::new);
        }
        Err(e) => {
            tracing::error!("ERR: read body: {}", e);
            return synthesizer::text(StatusCode::BAD_REQUEST, "Failed to read request body\n")
                .map(Full::new);
        }
    };

    pipeline
        .handle(Request::from_parts(parts, body))
        .await
        .map(Full::new)
}

/// `:port` listens on every interface.
fn listen_address(addr: &str) -> std::borrow::Cow<'_, str> {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}").into()
    } else {
        addr.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address() {
        assert_eq!(listen_address(":80"), "0.0.0.0:80");
        assert_eq!(listen_address("localhost:8080"), "localhost:8080");
        assert_eq!(listen_address("127.0.0.1:80"), "127.0.0.1:80");
    }
}
