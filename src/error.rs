use std::path::PathBuf;

use crate::geom::IntBbox;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed failures surfaced by the processing pipeline.
///
/// An empty vector-database result is deliberately *not* represented here:
/// it is a successful "no overlay" outcome (see [`crate::bduni::FetchOutcome`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required extra dimension is absent from the tile (or has the wrong
    /// element type).
    #[error("missing extra dimension `{0}` on tile")]
    MissingDimension(String),

    /// The configured SRID does not cover the tile's bounding box.
    #[error("bbox {bbox} does not intersect any territory with SRID {srid}")]
    BadProjection { bbox: IntBbox, srid: u32 },

    /// The vector database could not be reached (network, credentials,
    /// host resolution, missing client utility).
    #[error("vector database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// The vector-database fetch exceeded its wall-clock budget.
    #[error("vector database request timed out after {0} s")]
    DatabaseTimeout(u64),

    /// Tile or snapshot read/write failure, with the offending path.
    #[error("i/o failure on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A configuration field is out of range, inconsistent, or missing.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No optimiser trial met every constraint; the best-product fallback
    /// applies. Emitted as a warning, never aborts a study.
    #[error("no trial met the precision/recall/automation constraints")]
    NoFeasibleTrial,
}

impl Error {
    /// Wrap any error as an [`Error::Io`] tagged with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Io { path: path.into(), source: source.into() }
    }
}
