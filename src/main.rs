mod config;
mod convert;
mod error;
mod flatten;
mod geocode;
mod metadata;
mod record;

use crate::config::AppConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

#[derive(Parser)]
#[command(name = "signscape", about = "Sign-survey photo pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert raw photos into bounded-size JPEGs
    Convert {
        /// Reprocess images whose output already exists
        #[arg(long)]
        force: bool,
    },
    /// Flatten the survey spreadsheet into the output JSON document
    Build,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::new()?;

    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    info!("Starting signscape");

    match cli.command {
        Command::Convert { force } => convert::run(&config, force)?,
        Command::Build => flatten::run(&config)?,
    }

    info!("signscape finished");
    Ok(())
}
