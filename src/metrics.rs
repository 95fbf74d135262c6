use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};
use std::time::Duration;

pub struct ProxyMetrics {
    registry: Registry,

    // Request metrics
    pub requests_total: IntCounter,
    pub local_responses_total: IntCounter,
    pub rejected_total: IntCounter,
    pub forwarded_total: IntCounter,
    pub upstream_errors_total: IntCounter,

    // Exchange metrics
    pub exchange_failures_total: IntCounter,
    pub exchange_duration: Histogram,
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::new(
            "gce_proxy_requests_total",
            "Total number of requests received",
        )
        .expect("metric creation failed");
        let local_responses_total = IntCounter::new(
            "gce_proxy_local_responses_total",
            "Requests answered without contacting the metadata server",
        )
        .expect("metric creation failed");
        let rejected_total = IntCounter::new(
            "gce_proxy_rejected_total",
            "Identity requests rejected for a missing Metadata-Flavor header",
        )
        .expect("metric creation failed");
        let forwarded_total = IntCounter::new(
            "gce_proxy_forwarded_total",
            "Requests forwarded to the metadata server",
        )
        .expect("metric creation failed");
        let upstream_errors_total = IntCounter::new(
            "gce_proxy_upstream_errors_total",
            "Forwarded requests that failed",
        )
        .expect("metric creation failed");

        let exchange_failures_total = IntCounter::new(
            "gce_proxy_exchange_failures_total",
            "Failed credential exchanges",
        )
        .expect("metric creation failed");
        let exchange_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "gce_proxy_exchange_duration_seconds",
            "Credential exchange duration in seconds",
        ))
        .expect("metric creation failed");

        // Register all metrics
        registry.register(Box::new(requests_total.clone())).unwrap();
        registry
            .register(Box::new(local_responses_total.clone()))
            .unwrap();
        registry.register(Box::new(rejected_total.clone())).unwrap();
        registry.register(Box::new(forwarded_total.clone())).unwrap();
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(exchange_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(exchange_duration.clone()))
            .unwrap();

        Self {
            registry,
            requests_total,
            local_responses_total,
            rejected_total,
            forwarded_total,
            upstream_errors_total,
            exchange_failures_total,
            exchange_duration,
        }
    }

    pub fn record_exchange(&self, duration: Duration, success: bool) {
        self.exchange_duration.observe(duration.as_secs_f64());
        if !success {
            self.exchange_failures_total.inc();
        }
    }

    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exchange() {
        let metrics = ProxyMetrics::new();
        metrics.record_exchange(Duration::from_millis(20), true);
        metrics.record_exchange(Duration::from_millis(40), false);

        assert_eq!(metrics.exchange_failures_total.get(), 1);
        assert_eq!(metrics.exchange_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_gather_contains_counters() {
        let metrics = ProxyMetrics::new();
        metrics.requests_total.inc();
        metrics.forwarded_total.inc();

        let text = metrics.gather();
        assert!(text.contains("gce_proxy_requests_total 1"));
        assert!(text.contains("gce_proxy_forwarded_total 1"));
        assert!(text.contains("gce_proxy_exchange_duration_seconds"));
    }
}
