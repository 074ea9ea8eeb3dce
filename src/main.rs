use anyhow::Result;
use clap::Parser;

use meridian::cli::args::{Cli, Command};
use meridian::cli::context::{init_tracing, load_configuration};
use meridian::config::MeridianConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.command {
        Command::Init(_) => MeridianConfig::default(),
        _ => load_configuration(cli.config.clone())?,
    };
    init_tracing(&config.logging)?;
    meridian::cli::run(cli, config).await
}
