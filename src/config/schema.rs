use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Service account to impersonate (required)
    #[serde(default)]
    pub identity: String,
    /// Address the metadata proxy listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Host every forwarded request is redirected to
    #[serde(default = "default_metadata_host")]
    pub metadata_host: String,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Optional admin listener serving /metrics and /health
    #[serde(default)]
    pub metrics_address: Option<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// Base URL of the IAM Credentials API
    #[serde(default = "default_exchange_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
    /// Where the proxy's own credentials come from
    #[serde(default)]
    pub source: SourceKind,
    /// Bearer token used when `source` is `static`, and preferred by `auto`
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Static token if one is set, otherwise Application Default Credentials
    #[default]
    Auto,
    Static,
    /// The instance's own service account on `metadata_host`
    Metadata,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1:80".to_string()
}

fn default_metadata_host() -> String {
    "169.254.169.254".to_string()
}

fn default_exchange_endpoint() -> String {
    "https://iamcredentials.googleapis.com".to_string()
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            identity: String::new(),
            bind_address: default_bind_address(),
            metadata_host: default_metadata_host(),
            exchange: ExchangeConfig::default(),
            upstream: UpstreamConfig::default(),
            metrics_address: None,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_exchange_endpoint(),
            timeout_secs: default_exchange_timeout(),
            source: SourceKind::default(),
            token: None,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout(),
        }
    }
}

impl Config {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange.timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Base URL of the real metadata server, used for forwarding and for
    /// fetching the proxy's own credentials.
    pub fn metadata_root(&self) -> String {
        format!("http://{}", self.metadata_host)
    }
}
