//! Typed configuration for the whole pipeline.
//!
//! The configuration is one TOML document, deserialised into [`Config`] and
//! validated at load time so threshold and code mistakes surface before any
//! tile is touched. Every section has working defaults; a minimal run only
//! needs `paths` and (for database overlay) `bd_uni`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::bduni::{BdUniConnectionParams, BdUniRequestParams};
use crate::cluster::ClusterParams;
use crate::error::{Error, Result};
use crate::optimizer::Phase;
use crate::validator::{ThresholdRanges, Thresholds};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub data_format: DataFormat,
    /// Absent when no vector database is reachable; the validator then runs
    /// without overlay (or from a user-supplied shapefile).
    #[serde(default)]
    pub bd_uni: Option<BdUniConfig>,
    #[serde(default)]
    pub building_validation: BuildingValidationConfig,
    #[serde(default)]
    pub building_completion: BuildingCompletionConfig,
    #[serde(default)]
    pub building_identification: BuildingIdentificationConfig,
    #[serde(default)]
    pub vegetation_identification: VegetationIdentificationConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Config =
            toml::from_str(&text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.data_format.codes.building.validate()?;
        self.building_validation.thresholds.validate()?;
        validate_cluster("building_validation.cluster", &self.building_validation.cluster)?;
        validate_cluster("building_completion.cluster", &self.building_completion.cluster)?;
        validate_cluster("building_identification.cluster", &self.building_identification.cluster)?;
        validate_fraction(
            "building_completion.min_building_proba",
            self.building_completion.min_building_proba,
        )?;
        validate_fraction(
            "building_completion.min_building_proba_relaxation_if_bd_uni_overlay",
            self.building_completion.min_building_proba_relaxation_if_bd_uni_overlay,
        )?;
        validate_fraction(
            "building_identification.min_building_proba",
            self.building_identification.min_building_proba,
        )?;
        validate_fraction(
            "vegetation_identification.vegetation_threshold",
            self.vegetation_identification.vegetation_threshold,
        )?;
        validate_fraction(
            "vegetation_identification.unclassified_threshold",
            self.vegetation_identification.unclassified_threshold,
        )?;
        self.optimization.validate()?;
        Ok(())
    }
}

fn validate_fraction(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidConfig(format!("{field} = {value} is outside [0, 1]")));
    }
    Ok(())
}

fn validate_cluster(field: &str, cluster: &ClusterParams) -> Result<()> {
    if cluster.min_points == 0 {
        return Err(Error::InvalidConfig(format!("{field}.min_points must be at least 1")));
    }
    if !(cluster.tolerance > 0.0) {
        return Err(Error::InvalidConfig(format!("{field}.tolerance must be positive")));
    }
    Ok(())
}

/// Source and destination locations for batch application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// A tile file, or a directory searched recursively for tiles.
    pub src_las: PathBuf,
    pub output_dir: PathBuf,
}

/// Tile dimension names, classification codes and cleaning profiles.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataFormat {
    /// SRS override; when absent the EPSG code is read from the tile header.
    #[serde(default)]
    pub epsg: Option<u32>,
    #[serde(default)]
    pub dimensions: DimensionNames,
    #[serde(default)]
    pub codes: Codes,
    #[serde(default)]
    pub cleaning: CleaningProfiles,
}

/// Names of the extra dimensions this pipeline reads and writes. Treated as
/// stable identifiers; override only to match a different upstream model.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DimensionNames {
    pub ai_building_proba: String,
    pub ai_vegetation_proba: String,
    pub ai_unclassified_proba: String,
    pub entropy: String,
    pub candidate_buildings_flag: String,
    pub cluster_id_candidates: String,
    pub cluster_id_isolated_plus_confirmed: String,
    pub uni_db_overlay: String,
    pub ai_building_identified: String,
    pub ai_vegetation_unclassified_groups: String,
}

impl Default for DimensionNames {
    fn default() -> Self {
        Self {
            ai_building_proba: "building".to_string(),
            ai_vegetation_proba: "vegetation".to_string(),
            ai_unclassified_proba: "unclassified".to_string(),
            entropy: "entropy".to_string(),
            candidate_buildings_flag: "BuildingsCandidateFlag".to_string(),
            cluster_id_candidates: "ClusterID_candidate_building".to_string(),
            cluster_id_isolated_plus_confirmed: "ClusterID_isolated_plus_confirmed".to_string(),
            uni_db_overlay: "BDTopoOverlay".to_string(),
            ai_building_identified: "Group".to_string(),
            ai_vegetation_unclassified_groups: "ai_vegetation_unclassified_groups".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Codes {
    pub building: BuildingCodes,
    pub vegetation: u8,
    pub unclassified: u8,
}

impl Default for Codes {
    fn default() -> Self {
        Self { building: BuildingCodes::default(), vegetation: 3, unclassified: 1 }
    }
}

/// Classification codes involved in building validation: the candidate set,
/// the seven detailed decision codes, their collapse onto the three final
/// codes, and the final codes themselves.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildingCodes {
    pub candidates: Vec<u8>,
    pub detailed: DetailedCodes,
    #[serde(rename = "final")]
    pub final_codes: FinalCodes,
    pub detailed_to_final: Vec<(u8, u8)>,
}

impl Default for BuildingCodes {
    fn default() -> Self {
        let detailed = DetailedCodes::default();
        let final_codes = FinalCodes::default();
        let detailed_to_final = vec![
            (detailed.unsure_by_entropy, final_codes.unsure),
            (detailed.both_unsure, final_codes.unsure),
            (detailed.db_overlayed_only, final_codes.unsure),
            (detailed.both_confirmed, final_codes.building),
            (detailed.ia_confirmed_only, final_codes.building),
            (detailed.ia_refuted, final_codes.not_building),
            (detailed.ia_refuted_but_under_db_uni, final_codes.not_building),
        ];
        Self { candidates: vec![202], detailed, final_codes, detailed_to_final }
    }
}

impl BuildingCodes {
    /// The detailed → final collapse as a lookup map. Fails when a detailed
    /// code is unmapped, mapped twice, or mapped outside the final codes.
    pub fn detailed_to_final_map(&self) -> Result<HashMap<u8, u8>> {
        let mut map = HashMap::new();
        for &(detailed, final_code) in &self.detailed_to_final {
            if map.insert(detailed, final_code).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "codes.building.detailed_to_final maps detailed code {detailed} twice"
                )));
            }
            if ![self.final_codes.building, self.final_codes.not_building, self.final_codes.unsure]
                .contains(&final_code)
            {
                return Err(Error::InvalidConfig(format!(
                    "codes.building.detailed_to_final maps {detailed} to {final_code}, which is not a final code"
                )));
            }
        }
        for detailed in self.detailed.all() {
            if !map.contains_key(&detailed) {
                return Err(Error::InvalidConfig(format!(
                    "codes.building.detailed_to_final leaves detailed code {detailed} unmapped"
                )));
            }
        }
        Ok(map)
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidates.is_empty() {
            return Err(Error::InvalidConfig(
                "codes.building.candidates must not be empty".to_string(),
            ));
        }
        self.detailed_to_final_map().map(|_| ())
    }
}

/// The seven-way decision vocabulary of the validator.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DetailedCodes {
    pub unsure_by_entropy: u8,
    pub both_unsure: u8,
    pub both_confirmed: u8,
    pub ia_confirmed_only: u8,
    pub db_overlayed_only: u8,
    pub ia_refuted: u8,
    pub ia_refuted_but_under_db_uni: u8,
}

impl Default for DetailedCodes {
    fn default() -> Self {
        Self {
            unsure_by_entropy: 230,
            both_unsure: 231,
            both_confirmed: 232,
            ia_confirmed_only: 233,
            db_overlayed_only: 234,
            ia_refuted: 235,
            ia_refuted_but_under_db_uni: 236,
        }
    }
}

impl DetailedCodes {
    pub fn all(&self) -> [u8; 7] {
        [
            self.unsure_by_entropy,
            self.both_unsure,
            self.both_confirmed,
            self.ia_confirmed_only,
            self.db_overlayed_only,
            self.ia_refuted,
            self.ia_refuted_but_under_db_uni,
        ]
    }
}

/// The three-way collapse: building, not building, unsure.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FinalCodes {
    pub building: u8,
    pub not_building: u8,
    pub unsure: u8,
}

impl Default for FinalCodes {
    fn default() -> Self {
        Self { building: 6, not_building: 208, unsure: 214 }
    }
}

/// Extra-dimension retention profiles (`name` or `name=type` entries, or the
/// single `all` wildcard).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CleaningProfiles {
    /// Dimensions kept when a tile enters the pipeline.
    pub input: Vec<String>,
    /// Dimensions kept on the published tile.
    pub output: Vec<String>,
}

impl Default for CleaningProfiles {
    fn default() -> Self {
        Self {
            input: vec![
                "building=float".to_string(),
                "vegetation=float".to_string(),
                "unclassified=float".to_string(),
                "entropy=float".to_string(),
            ],
            output: vec![
                "Group=uint32".to_string(),
                "building=float".to_string(),
                "entropy=float".to_string(),
                "ai_vegetation_unclassified_groups=uint32".to_string(),
            ],
        }
    }
}

/// Connection and request tuning for the vector database.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BdUniConfig {
    pub connection: BdUniConnectionParams,
    #[serde(default)]
    pub request: BdUniRequestParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildingValidationConfig {
    /// Use this vector layer instead of querying the database.
    pub shp_path: Option<PathBuf>,
    pub cluster: ClusterParams,
    pub thresholds: Thresholds,
    /// Write final (three-way) codes rather than detailed (seven-way) ones.
    pub use_final_classification_codes: bool,
}

impl Default for BuildingValidationConfig {
    fn default() -> Self {
        Self {
            shp_path: None,
            cluster: ClusterParams { min_points: 10, tolerance: 0.5, is3d: true },
            thresholds: Thresholds::default(),
            use_final_classification_codes: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildingCompletionConfig {
    pub min_building_proba: f64,
    pub min_building_proba_relaxation_if_bd_uni_overlay: f64,
    pub cluster: ClusterParams,
}

impl Default for BuildingCompletionConfig {
    fn default() -> Self {
        Self {
            min_building_proba: 0.75,
            min_building_proba_relaxation_if_bd_uni_overlay: 1.0,
            // Relaxed 2D clustering so isolated points attach to nearby
            // confirmed buildings.
            cluster: ClusterParams { min_points: 10, tolerance: 2.0, is3d: false },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildingIdentificationConfig {
    pub min_building_proba: f64,
    pub cluster: ClusterParams,
    /// When used as a standalone tool, also rewrite the classification of
    /// grouped points to the final building code.
    pub standalone: bool,
}

impl Default for BuildingIdentificationConfig {
    fn default() -> Self {
        Self {
            min_building_proba: 0.5,
            cluster: ClusterParams { min_points: 10, tolerance: 0.5, is3d: true },
            standalone: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VegetationIdentificationConfig {
    pub vegetation_threshold: f64,
    pub unclassified_threshold: f64,
}

impl Default for VegetationIdentificationConfig {
    fn default() -> Self {
        Self { vegetation_threshold: 0.5, unclassified_threshold: 0.5 }
    }
}

/// Reference label codes of the hand-corrected corpus, and the member
/// fractions deciding a cluster's ground-truth class.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReferenceLabels {
    /// Codes marking points confirmed as building by the annotators.
    pub true_positives: Vec<u8>,
    /// Codes marking points refuted by the annotators.
    pub false_positives: Vec<u8>,
    /// At or above this true-positive fraction the cluster is a building.
    pub min_frac_true_positives: f64,
    /// Below this true-positive fraction the cluster is not a building;
    /// anything in between is ambiguous.
    pub max_frac_false_positives: f64,
}

impl Default for ReferenceLabels {
    fn default() -> Self {
        Self {
            true_positives: vec![19],
            false_positives: vec![20],
            min_frac_true_positives: 0.95,
            max_frac_false_positives: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OptimizationConfig {
    /// Root of the optimiser working tree (`inputs/`, `prepared/`,
    /// `updated/`, snapshots).
    pub root: PathBuf,
    /// Which phases to run.
    pub todo: Vec<Phase>,
    pub n_trials: usize,
    pub seed: u64,
    pub ranges: ThresholdRanges,
    pub constraints: Constraints,
    pub labels: ReferenceLabels,
    /// Write final codes during the update phase.
    pub use_final_classification_codes: bool,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            todo: vec![Phase::Prepare, Phase::Optimize, Phase::Evaluate, Phase::Update],
            n_trials: 300,
            seed: 42,
            ranges: ThresholdRanges::default(),
            constraints: Constraints::default(),
            labels: ReferenceLabels::default(),
            use_final_classification_codes: false,
        }
    }
}

impl OptimizationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_trials == 0 {
            return Err(Error::InvalidConfig("optimization.n_trials must be at least 1".to_string()));
        }
        self.ranges.validate()?;
        self.constraints.validate()?;
        validate_fraction(
            "optimization.labels.min_frac_true_positives",
            self.labels.min_frac_true_positives,
        )?;
        validate_fraction(
            "optimization.labels.max_frac_false_positives",
            self.labels.max_frac_false_positives,
        )?;
        Ok(())
    }
}

/// Minimum acceptable metrics; a trial is feasible when it meets all three.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Constraints {
    pub min_precision: f64,
    pub min_recall: f64,
    pub min_automation: f64,
}

impl Default for Constraints {
    fn default() -> Self {
        Self { min_precision: 0.98, min_recall: 0.98, min_automation: 0.35 }
    }
}

impl Constraints {
    pub fn validate(&self) -> Result<()> {
        validate_fraction("optimization.constraints.min_precision", self.min_precision)?;
        validate_fraction("optimization.constraints.min_recall", self.min_recall)?;
        validate_fraction("optimization.constraints.min_automation", self.min_automation)
    }
}
