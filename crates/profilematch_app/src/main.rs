mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use profilematch_logging::{pm_error, pm_info};

use crate::cli::Cli;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?.with_overrides(&cli);

    profilematch_logging::initialize(&config.log_destination(), config.log_level());
    pm_info!("profilematch {} using {}", env!("CARGO_PKG_VERSION"), config.server_url);

    let result = commands::run(cli.command, &config).await;
    if let Err(err) = &result {
        pm_error!("{:#}", err);
    }
    result
}
