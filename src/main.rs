use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use gce_impersonation_proxy::config::{self, CliOverrides};
use gce_impersonation_proxy::error::{ConfigError, ProxyError, Result};
use gce_impersonation_proxy::exchange::{CredentialExchange, IamCredentialsClient};
use gce_impersonation_proxy::identity::ImpersonatedIdentity;
use gce_impersonation_proxy::logging::{self, LogFormat};
use gce_impersonation_proxy::metrics::ProxyMetrics;
use gce_impersonation_proxy::proxy::{self, ProxyServer};
use gce_impersonation_proxy::web;

#[derive(Parser, Debug)]
#[command(name = "gce-impersonation-proxy")]
#[command(about = "Metadata server proxy serving tokens for an impersonated service account", long_about = None)]
struct Args {
    /// Service Account to impersonate
    #[arg(short = 'I', long = "impersonate", value_name = "ACCOUNT")]
    identity: Option<String>,

    /// Bind address [default: 127.0.0.1:80]
    #[arg(short = 'B', long = "bind", value_name = "ADDR")]
    bind_address: Option<String>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serve /metrics and /health on this address
    #[arg(long, value_name = "ADDR")]
    metrics_address: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init(args.debug, args.log_format);

    let overrides = CliOverrides {
        identity: args.identity.clone(),
        bind_address: args.bind_address.clone(),
        metrics_address: args.metrics_address.clone(),
    };

    let config = match config::load(args.config.as_deref(), &overrides) {
        Ok(cfg) => cfg,
        Err(ProxyError::Config(e)) => {
            eprintln!("error: {e}\n");
            let _ = Args::command().print_help();
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    let identity = Arc::new(ImpersonatedIdentity::new(config.identity.clone())?);
    info!("Starting GCE impersonation proxy for {}", identity);
    info!(
        "Forwarding metadata traffic to {}, exchange endpoint {}",
        config.metadata_host, config.exchange.endpoint
    );

    let metrics = Arc::new(ProxyMetrics::new());
    let exchange: Arc<dyn CredentialExchange> = Arc::new(IamCredentialsClient::new(
        config.exchange.clone(),
        config.metadata_root(),
    ));

    let pipeline = Arc::new(proxy::build_pipeline(
        &config,
        identity,
        exchange,
        metrics.clone(),
    )?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let server = ProxyServer::bind(&config.bind_address, pipeline, config.shutdown_grace()).await?;
    let proxy_shutdown = shutdown_tx.subscribe();
    let mut proxy_handle = tokio::spawn(async move { server.run(proxy_shutdown).await });

    let admin_handle = match &config.metrics_address {
        Some(addr) => {
            let addr = addr.parse().map_err(|e| {
                ConfigError::Validation(format!("Invalid metrics address '{}': {}", addr, e))
            })?;
            let admin_shutdown = shutdown_tx.subscribe();
            let metrics = metrics.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = web::start_server(addr, metrics, admin_shutdown).await {
                    error!("Admin server error: {}", e);
                }
            }))
        }
        None => None,
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        result = &mut proxy_handle => {
            // The proxy stopped on its own; nothing left to serve.
            match result {
                Ok(Err(e)) => error!("Proxy server error: {}", e),
                Err(e) => error!("Proxy server task failed: {}", e),
                Ok(Ok(())) => {}
            }
            let _ = shutdown_tx.send(());
            return Ok(());
        }
    }

    info!("Shutting down GCE impersonation proxy");
    let _ = shutdown_tx.send(());

    match proxy_handle.await {
        Ok(Err(e)) => error!("Proxy server error: {}", e),
        Err(e) => error!("Proxy server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Some(handle) = admin_handle {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
