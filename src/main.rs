//! Logitech MX5500 driver CLI
//!
//! Lists supported devices, runs the driver framework against them and sends
//! raw reports for debugging.

use std::path::Path;

use clap::Parser;
use lgx_driver::Config;
use tracing::info;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let monitor = commands::create_monitor_config(cli.monitor, cli.hex, cli.filter.as_deref())?;

    match cli.command.unwrap_or(Commands::List { json: false }) {
        // Does not load the file, so `config --init` works even if it is broken
        Commands::Config { init } => commands::config(&config_path, init)?,
        Commands::Drivers => commands::drivers(&load_config(&config_path)?),
        Commands::List { json } => commands::list(&load_config(&config_path)?, json)?,
        Commands::Run { events } => {
            commands::run(&load_config(&config_path)?, monitor, events).await?
        }
        Commands::Send { path, hex } => {
            commands::send(&load_config(&config_path)?, monitor, &path, &hex)?
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    info!("Loading config from {:?}", path);
    Config::load(path)
}
