use super::schema::Config;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::LazyLock;

const ENV_PREFIX: &str = "GCE_PROXY_";

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_address: Option<String>,
}

/// Layer defaults, an optional config file, `GCE_PROXY_*` environment
/// variables and CLI overrides, then validate the result.
pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(path) = path {
        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            _ => {
                return Err(ConfigError::Parse(
                    "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
                )
                .into())
            }
        };
    }

    let config: Config = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = apply_env_substitutions(config)?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.identity.trim().is_empty() {
        return Err(ConfigError::MissingField("identity".into()).into());
    }

    if config.bind_address.trim().is_empty() {
        return Err(ConfigError::MissingField("bind_address".into()).into());
    }
    // Hostnames and `:port` are resolved when the listener binds.

    if config.metadata_host.is_empty()
        || config.metadata_host.contains("://")
        || config.metadata_host.contains('/')
    {
        return Err(ConfigError::Validation(format!(
            "Metadata host must be a bare host, got '{}'",
            config.metadata_host
        ))
        .into());
    }

    let endpoint = &config.exchange.endpoint;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "Exchange endpoint '{}' must be an http(s) URL",
            endpoint
        ))
        .into());
    }

    if config.exchange.timeout_secs == 0 || config.upstream.timeout_secs == 0 {
        return Err(ConfigError::Validation("Timeouts must be greater than 0".into()).into());
    }

    if let Some(metrics) = &config.metrics_address {
        let metrics: SocketAddr = metrics.parse().map_err(|e| {
            ConfigError::Validation(format!("Invalid metrics address '{}': {}", metrics, e))
        })?;
        if config.bind_address.parse::<SocketAddr>().ok() == Some(metrics) {
            return Err(ConfigError::Validation(
                "Proxy and metrics addresses must be different".into(),
            )
            .into());
        }
    }

    Ok(())
}

fn apply_env_substitutions(mut config: Config) -> Result<Config> {
    config.identity = substitute_env_vars(&config.identity)?;
    config.exchange.endpoint = substitute_env_vars(&config.exchange.endpoint)?;
    if let Some(token) = &mut config.exchange.token {
        *token = substitute_env_vars(token)?;
    }
    Ok(config)
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                // ${VAR:-default}
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "Environment variable '{}' not found",
                        var_name
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}
