use anyhow::{Context, Result};
use lidarfuse::{applying, just_clean, CancelToken, Config};

use crate::cli::{ApplyArgs, Cli};

pub fn run(cli: &Cli, args: &ApplyArgs) -> Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("load configuration {}", cli.config.display()))?;
    if let Some(src) = &args.src {
        config.paths.src_las = src.clone();
    }
    if let Some(output) = &args.output {
        config.paths.output_dir = output.clone();
    }

    let processed = applying(&config, &CancelToken::new(), just_clean)?;
    println!("Cleaned {} tile(s) into {}", processed.len(), config.paths.output_dir.display());
    Ok(())
}
