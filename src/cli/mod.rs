//! Command-line entry points.

pub mod commands;
pub mod types;

pub use types::{Cli, Commands};

use anyhow::Result;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load configuration for `cli`, applying command-line overrides.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.to_lowercase();
        ConfigLoader::validate(&config)?;
    }
    Ok(config)
}

/// Run the selected command to completion.
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Serve => commands::serve::execute(config).await,
        Commands::Hub(args) => commands::hub::execute(config, args).await,
        Commands::Bridge(args) => commands::bridge::execute(config, args).await,
    }
}
