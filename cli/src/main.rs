mod cli;
mod commands;

use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

pub fn run() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match &cli.command {
        Commands::Apply(args) => commands::apply::run(&cli, args),
        Commands::Optimize(args) => commands::optimize::run(&cli, args),
        Commands::DetectVegetation(args) => commands::detect_vegetation::run(&cli, args),
        Commands::Clean(args) => commands::clean::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { run() }
