use anyhow::{Context, Result};
use lidarfuse::{BuildingValidationOptimizer, CancelToken, Config};

use crate::cli::{Cli, OptimizeArgs};

pub fn run(cli: &Cli, args: &OptimizeArgs) -> Result<()> {
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("load configuration {}", cli.config.display()))?;
    if let Some(root) = &args.root {
        config.optimization.root = root.clone();
    }
    if !args.todo.is_empty() {
        config.optimization.todo = args.todo.iter().map(|&phase| phase.into()).collect();
    }

    let mut optimizer = BuildingValidationOptimizer::from_config(&config, CancelToken::new())?;
    if let Some(metrics) = optimizer.run()? {
        println!("{metrics}");
    }
    Ok(())
}
