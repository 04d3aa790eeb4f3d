mod cli;
mod commands;
mod config;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;
    init_logging(args.verbose, args.quiet, &config);

    let bus = config.bus_config(args.endpoint.as_deref());
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => warn!(error = %e, "Cannot listen for ctrl-c"),
            }
            cancel.cancel();
        }
    });

    commands::run(args.command, &config, bus, cancel).await
}

fn init_logging(verbose: bool, quiet: bool, config: &AppConfig) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_deref().unwrap_or("info")))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(config.log_json.then(|| fmt::layer().json()))
        .with((!config.log_json).then(|| fmt::layer().with_target(verbose)))
        .init();
}
