use std::process::ExitCode;

use anyhow::Context;
use filament::config::{Config, ConfigError, USAGE};
use filament::listing::listing_route;
use filament::server::{shutdown_signal, Server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::Usage(_)) => {
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(1);
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let shutdown = shutdown_signal().context("failed to install signal handlers")?;
    let routes = vec![listing_route(&cfg.doc_root)];

    let server = Server::bind(&cfg, routes).await?;
    server.run(shutdown).await?;

    info!("server stopped");
    Ok(())
}
