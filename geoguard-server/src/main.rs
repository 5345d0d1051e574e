//! # GeoGuard Server
//!
//! Batch barcode scanning service. Configuration comes from `.env`, an
//! optional `geoguard.toml`, the environment, and finally the command line.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geoguard_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use geoguard_core::SmtpTransport;
use geoguard_server::{AppState, create_app};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "geoguard-server")]
#[command(about = "Batch scan service that mails completed reports")]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to a geoguard.toml file
    #[arg(short, long, env = "GEOGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_server(cli.serve).await
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration file loaded");
    }

    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }

    info!(
        batch.capacity = config.batch.capacity,
        batch.auto_finalize = config.batch.auto_finalize,
        smtp.host = %config.mail.smtp_host,
        smtp.port = config.mail.smtp_port,
        "batch configuration in effect"
    );

    let transport = Arc::new(SmtpTransport::new(
        config.mail.smtp_host.clone(),
        config.mail.smtp_port,
    ));
    let state = AppState::from_config(&config, transport);
    let app = create_app(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("GeoGuard server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
