use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shrinko_runtime::{BridgeConfig, WasmLauncher};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "shrinko-worker",
    about = "Runs shrinko8 in an embedded environment and serves it over stdio"
)]
struct Cli {
    /// Config file (default: ~/.shrinko/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory tool archives are resolved against, overriding the config's
    #[arg(long)]
    site_dir: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = BridgeConfig::default_path();
            if path.exists() {
                BridgeConfig::from_file(&path)?
            } else {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                BridgeConfig::default()
            }
        }
    };
    if let Some(dir) = &cli.site_dir {
        config.base_dir = Some(dir.clone());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol
    fmt()
        .with_env_filter(EnvFilter::from_env("SHRINKO_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing::info!(
        base_dir = ?config.base_dir,
        module = %config.tool.module,
        "Starting shrinko worker"
    );

    let handle = shrinko_worker::spawn(config, Arc::new(WasmLauncher));
    shrinko_worker::protocol::serve(handle, tokio::io::stdin(), tokio::io::stdout()).await?;

    tracing::info!("Input closed, shutting down");
    Ok(())
}
