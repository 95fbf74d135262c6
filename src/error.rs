use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("CONNECT is not supported")]
    ConnectUnsupported,
}

/// Stage of the credential exchange that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeStage {
    /// Obtaining the proxy's own credentials for the IAM Credentials API
    Initialize,
    /// Calling `generateAccessToken` for the impersonated identity
    Generate,
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{0}")]
    Initialize(String),

    #[error("{0}")]
    Generate(String),

    #[error("invalid service account name: {0:?}")]
    InvalidIdentity(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ExchangeError {
    pub fn stage(&self) -> ExchangeStage {
        match self {
            ExchangeError::Initialize(_) => ExchangeStage::Initialize,
            ExchangeError::Generate(_)
            | ExchangeError::InvalidIdentity(_)
            | ExchangeError::Timeout(_) => ExchangeStage::Generate,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_error_stage() {
        assert_eq!(
            ExchangeError::Initialize("no credentials".into()).stage(),
            ExchangeStage::Initialize
        );
        assert_eq!(
            ExchangeError::Generate("permission denied".into()).stage(),
            ExchangeStage::Generate
        );
        assert_eq!(
            ExchangeError::InvalidIdentity(String::new()).stage(),
            ExchangeStage::Generate
        );
        assert_eq!(
            ExchangeError::Timeout(Duration::from_secs(1)).stage(),
            ExchangeStage::Generate
        );
    }

    #[test]
    fn test_config_error_wraps_into_proxy_error() {
        let err: ProxyError = ConfigError::MissingField("identity".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required field: identity"
        );
    }
}
