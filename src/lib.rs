#![doc = "Lidarfuse public API: building validation for aerial LiDAR tiles"]

mod application;
mod basic;
mod bduni;
mod cleaning;
mod cluster;
mod completor;
mod config;
mod error;
mod geom;
mod identifier;
mod optimizer;
mod overlay;
mod tile;
mod validator;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use config::{
    BdUniConfig, BuildingCodes, BuildingCompletionConfig, BuildingIdentificationConfig,
    BuildingValidationConfig, CleaningProfiles, Codes, Config, Constraints, DataFormat,
    DetailedCodes, DimensionNames, FinalCodes, OptimizationConfig, PathsConfig, ReferenceLabels,
    VegetationIdentificationConfig,
};

#[doc(inline)]
pub use tile::{read_tile, write_tile, DataType, DimValues, ExtraBytesDescriptor, Tile};

#[doc(inline)]
pub use geom::{integer_bbox, IntBbox};

#[doc(inline)]
pub use cluster::{cluster_positions, cluster_tile_where, group_indices, ClusterParams};

#[doc(inline)]
pub use overlay::VectorLayer;

#[doc(inline)]
pub use bduni::{
    check_bbox_intersects_territory, fetch_building_footprints, BdUniConnectionParams,
    BdUniRequestParams, FetchOutcome,
};

#[doc(inline)]
pub use validator::{BuildingValidator, ClusterInfo, ThresholdRanges, Thresholds};

#[doc(inline)]
pub use completor::BuildingCompletor;

#[doc(inline)]
pub use identifier::BuildingIdentifier;

#[doc(inline)]
pub use basic::{BasicIdentifier, BasicIdentifierOptimizer, IoU};

#[doc(inline)]
pub use cleaning::Cleaner;

#[doc(inline)]
pub use optimizer::{
    constraint_penalty, evaluate_decisions, BuildingValidationOptimizer, DecisionMetrics,
    OptimizerPaths, Phase, SearchOutcome, ThresholdSearch, Trial,
};

#[doc(inline)]
pub use application::{
    apply, applying, detect_vegetation_unclassified, find_tile_paths, just_clean,
    process_one_file, CancelToken,
};

// Re-exported so downstream code and tests can assemble tiles without
// pinning their own copy of the LAS crate.
pub use las;
