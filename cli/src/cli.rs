use std::path::PathBuf;

/// Lidarfuse CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "lidarfuse", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file
    #[arg(short, long, default_value = "lidarfuse.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Validate, complete and identify buildings on every tile
    Apply(ApplyArgs),

    /// Optimise the validation thresholds against a labelled corpus
    Optimize(OptimizeArgs),

    /// Threshold vegetation / unclassified probabilities
    DetectVegetation(ApplyArgs),

    /// Strip tiles down to the configured input dimensions
    Clean(ApplyArgs),
}

#[derive(clap::Args, Debug)]
pub struct ApplyArgs {
    /// Tile file or directory of tiles; overrides `paths.src_las`
    #[arg(value_hint = clap::ValueHint::AnyPath)]
    pub src: Option<PathBuf>,

    /// Output directory; overrides `paths.output_dir`
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct OptimizeArgs {
    /// Root of the optimisation working tree; overrides `optimization.root`
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub root: Option<PathBuf>,

    /// Phases to run (defaults to the configured `optimization.todo`)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub todo: Vec<PhaseArg>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum PhaseArg {
    Prepare,
    Optimize,
    Evaluate,
    Update,
}

impl From<PhaseArg> for lidarfuse::Phase {
    fn from(phase: PhaseArg) -> Self {
        match phase {
            PhaseArg::Prepare => lidarfuse::Phase::Prepare,
            PhaseArg::Optimize => lidarfuse::Phase::Optimize,
            PhaseArg::Evaluate => lidarfuse::Phase::Evaluate,
            PhaseArg::Update => lidarfuse::Phase::Update,
        }
    }
}
