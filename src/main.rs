use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use buslink::commands;
use buslink::{Cli, Commands, Config};

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path).context("Failed to load configuration")?;
    tracing::debug!(
        delivery = %config.delivery,
        proc_root = %config.proc_root.display(),
        "Configuration loaded"
    );
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize tracing with RUST_LOG env filter
    // e.g., RUST_LOG=buslink=debug
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Status(args) => commands::status::run(args, &load_config(config_path)?),
        Commands::Monitor(args) => commands::monitor::run(args, &load_config(config_path)?),
        Commands::Locate(args) => commands::locate::run(args, &load_config(config_path)?),
        Commands::Completions(args) => commands::completions::run(args),
    }
}
