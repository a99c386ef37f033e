//! sliceup server entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Resumable chunked upload server.
#[derive(Debug, Parser)]
#[command(name = "sliceupd", version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "SLICEUP_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting sliceup server");

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    tracing::info!(
        port = config.port,
        storage = %config.default_storage,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
