//! Admin listener exposing Prometheus metrics and a health check.
//!
//! Kept off the proxy port: every path on the proxy belongs to the metadata
//! surface and is forwarded.

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::Filter;

pub async fn start_server(
    addr: SocketAddr,
    metrics: Arc<ProxyMetrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    tracing::info!("Starting admin server on {}", addr);

    let (_, server) = warp::serve(routes(metrics))
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown.recv().await;
        })
        .map_err(|e| ProxyError::Server(format!("failed to bind admin server on {addr}: {e}")))?;

    server.await;

    tracing::info!("Admin server stopped");
    Ok(())
}

fn routes(
    metrics: Arc<ProxyMetrics>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            warp::reply::with_header(
                metrics.gather(),
                "content-type",
                "text/plain; version=0.0.4",
            )
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "gce-impersonation-proxy"
            }))
        });

    metrics_route.or(health)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::test::request;

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(ProxyMetrics::new());
        metrics.requests_total.inc();
        let routes = routes(metrics);

        let resp = request()
            .method("GET")
            .path("/metrics")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), 200);
        let body = String::from_utf8(resp.body().to_vec()).unwrap();
        assert!(body.contains("gce_proxy_requests_total 1"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let routes = routes(Arc::new(ProxyMetrics::new()));

        let resp = request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_address_in_use_is_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let (_tx, rx) = broadcast::channel(1);

        let err = start_server(addr, Arc::new(ProxyMetrics::new()), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Server(_)));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let routes = routes(Arc::new(ProxyMetrics::new()));

        let resp = request().method("GET").path("/other").reply(&routes).await;
        assert_eq!(resp.status(), 404);
    }
}
