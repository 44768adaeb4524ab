//! Decision-threshold optimisation for building validation.
//!
//! Works over a hand-labelled corpus laid out under one root directory:
//!
//! ```text
//! <root>/inputs/           labelled source tiles
//! <root>/prepared/         tiles after Validator::prepare
//! <root>/updated/          tiles after Validator::update
//! <root>/group_info.json   serialised cluster-info list
//! <root>/thresholds.json   serialised threshold record
//! ```
//!
//! Preparation is the expensive part (clustering + database overlay), so it
//! runs once; the search then re-scores the extracted cluster records for
//! every trial.

mod metrics;
mod search;

pub use metrics::{evaluate_decisions, DecisionMetrics};
pub use search::{constraint_penalty, SearchOutcome, ThresholdSearch, Trial};

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::application::{find_tile_paths, CancelToken};
use crate::cluster::group_indices;
use crate::config::{Config, DimensionNames, FinalCodes, OptimizationConfig};
use crate::error::{Error, Result};
use crate::tile::{read_tile, write_tile};
use crate::validator::{BuildingValidator, ClusterInfo, Thresholds};

/// Steps of a study; any subset can run, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Prepare,
    Optimize,
    Evaluate,
    Update,
}

/// Filesystem layout of a study.
#[derive(Debug, Clone)]
pub struct OptimizerPaths {
    pub root: PathBuf,
}

impl OptimizerPaths {
    pub fn new(root: impl Into<PathBuf>) -> OptimizerPaths {
        OptimizerPaths { root: root.into() }
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    pub fn prepared_dir(&self) -> PathBuf {
        self.root.join("prepared")
    }

    pub fn updated_dir(&self) -> PathBuf {
        self.root.join("updated")
    }

    pub fn group_info(&self) -> PathBuf {
        self.root.join("group_info.json")
    }

    pub fn thresholds(&self) -> PathBuf {
        self.root.join("thresholds.json")
    }
}

/// Driver of a full threshold study over a labelled corpus.
pub struct BuildingValidationOptimizer {
    validator: BuildingValidator,
    paths: OptimizerPaths,
    optimization: OptimizationConfig,
    dims: DimensionNames,
    final_codes: FinalCodes,
    epsg: Option<u32>,
    cancel: CancelToken,
}

impl BuildingValidationOptimizer {
    /// Build the study from a loaded configuration. The validator's
    /// candidate set is widened to the reference label codes, and decisions
    /// run in detailed form until the final update.
    pub fn from_config(config: &Config, cancel: CancelToken) -> Result<BuildingValidationOptimizer> {
        let mut validator = BuildingValidator::from_config(config)?;
        let labels = &config.optimization.labels;
        let mut candidate_codes = labels.true_positives.clone();
        candidate_codes.extend_from_slice(&labels.false_positives);
        validator.set_candidate_codes(candidate_codes);
        validator.set_use_final_classification_codes(false);

        Ok(BuildingValidationOptimizer {
            validator,
            paths: OptimizerPaths::new(config.optimization.root.clone()),
            optimization: config.optimization.clone(),
            dims: config.data_format.dimensions.clone(),
            final_codes: config.data_format.codes.building.final_codes,
            epsg: config.data_format.epsg,
            cancel,
        })
    }

    pub fn paths(&self) -> &OptimizerPaths {
        &self.paths
    }

    /// Run the configured phases. Returns the evaluation metrics when the
    /// evaluate phase ran.
    pub fn run(&mut self) -> Result<Option<DecisionMetrics>> {
        let todo = self.optimization.todo.clone();
        let mut evaluated = None;
        if todo.contains(&Phase::Prepare) {
            self.prepare()?;
        }
        if todo.contains(&Phase::Optimize) {
            self.optimize()?;
        }
        if todo.contains(&Phase::Evaluate) {
            evaluated = Some(self.evaluate()?);
        }
        if todo.contains(&Phase::Update) {
            self.update()?;
        }
        Ok(evaluated)
    }

    /// Prepare every labelled tile and extract one cluster record per
    /// candidate cluster, with its ground-truth summary.
    pub fn prepare(&mut self) -> Result<()> {
        let inputs = find_tile_paths(&self.paths.inputs_dir())?;
        info!("preparing {} labelled tile(s)", inputs.len());

        let mut clusters: Vec<ClusterInfo> = Vec::new();
        for input in &inputs {
            if self.cancel.is_cancelled() {
                info!("cancelled between tiles; stopping preparation without a snapshot");
                return Ok(());
            }
            let mut tile = read_tile(input, self.epsg)?;
            self.validator.prepare(&mut tile)?;

            let prepared_path = self.paths.prepared_dir().join(file_name(input)?);
            write_tile(&tile, &prepared_path)?;

            clusters.extend(self.extract_clusters(&tile)?);
        }

        self.save_clusters(&clusters)?;
        info!("extracted {} cluster record(s)", clusters.len());
        Ok(())
    }

    /// Search the thresholds over the extracted cluster records and persist
    /// the selected ones.
    pub fn optimize(&mut self) -> Result<()> {
        let clusters = self.load_clusters()?;
        let targets = self.targets_of(&clusters)?;

        let search = ThresholdSearch {
            ranges: self.optimization.ranges.clone(),
            constraints: self.optimization.constraints,
            n_trials: self.optimization.n_trials,
            seed: self.optimization.seed,
            cancel: self.cancel.clone(),
        };
        let validator = &self.validator;
        let final_codes = self.final_codes;
        let outcome = search.run(|thresholds| {
            let decisions: Vec<u8> = clusters
                .iter()
                .map(|cluster| validator.decide_final_with(thresholds, cluster))
                .collect();
            evaluate_decisions(&targets, &decisions, &final_codes).key_metrics()
        })?;

        info!(
            "best trial (feasible: {}): automation={:.3} precision={:.3} recall={:.3}",
            outcome.feasible, outcome.best.automation, outcome.best.precision, outcome.best.recall
        );
        outcome.best.thresholds.save(&self.paths.thresholds())?;
        self.validator.set_thresholds(outcome.best.thresholds);
        Ok(())
    }

    /// Re-score the persisted thresholds over the cluster records and log
    /// the full report.
    pub fn evaluate(&mut self) -> Result<DecisionMetrics> {
        let clusters = self.load_clusters()?;
        let targets = self.targets_of(&clusters)?;
        let thresholds = Thresholds::load(&self.paths.thresholds())?;
        self.validator.set_thresholds(thresholds);

        let decisions: Vec<u8> =
            clusters.iter().map(|cluster| self.validator.decide_final(cluster)).collect();
        let metrics = evaluate_decisions(&targets, &decisions, &self.final_codes);
        info!("evaluation results:\n{metrics}");
        Ok(metrics)
    }

    /// Apply the persisted thresholds to every prepared tile.
    pub fn update(&mut self) -> Result<()> {
        let thresholds = Thresholds::load(&self.paths.thresholds())?;
        self.validator.set_thresholds(thresholds);
        self.validator
            .set_use_final_classification_codes(self.optimization.use_final_classification_codes);

        for prepared in find_tile_paths(&self.paths.prepared_dir())? {
            if self.cancel.is_cancelled() {
                info!("cancelled between tiles; stopping update");
                break;
            }
            let mut tile = read_tile(&prepared, self.epsg)?;
            self.validator.update(&mut tile)?;
            let updated_path = self.paths.updated_dir().join(file_name(&prepared)?);
            write_tile(&tile, &updated_path)?;
            info!("saved updated tile to {}", updated_path.display());
        }
        Ok(())
    }

    /// One record per candidate cluster of a prepared tile, with the
    /// ground-truth target derived from the reference labels.
    fn extract_clusters(&self, tile: &crate::tile::Tile) -> Result<Vec<ClusterInfo>> {
        let ids = tile.u32_dim(&self.dims.cluster_id_candidates)?.to_vec();
        let classification = tile.classification().to_vec();

        let mut clusters = Vec::new();
        for (_, members) in group_indices(&ids) {
            let target = self.ground_truth_target(&classification, &members);
            clusters.push(self.validator.extract_cluster_info(tile, &members, Some(target))?);
        }
        Ok(clusters)
    }

    /// Classify a cluster's ground truth from the fraction of members whose
    /// reference label is a true positive.
    fn ground_truth_target(&self, classification: &[u8], members: &[usize]) -> u8 {
        let labels = &self.optimization.labels;
        let tp_frac = members
            .iter()
            .filter(|&&i| labels.true_positives.contains(&classification[i]))
            .count() as f64
            / members.len().max(1) as f64;

        if tp_frac >= labels.min_frac_true_positives {
            self.final_codes.building
        } else if tp_frac < labels.max_frac_false_positives {
            self.final_codes.not_building
        } else {
            self.final_codes.unsure
        }
    }

    fn targets_of(&self, clusters: &[ClusterInfo]) -> Result<Vec<u8>> {
        clusters
            .iter()
            .map(|cluster| {
                cluster.target.ok_or_else(|| {
                    Error::io(
                        self.paths.group_info(),
                        "cluster record without ground-truth target".to_string(),
                    )
                })
            })
            .collect()
    }

    fn save_clusters(&self, clusters: &[ClusterInfo]) -> Result<()> {
        let path = self.paths.group_info();
        let data = serde_json::to_string(clusters).map_err(|e| Error::io(&path, e))?;
        fs::write(&path, data).map_err(|e| Error::io(&path, e))?;
        info!("saved cluster records to {}", path.display());
        Ok(())
    }

    fn load_clusters(&self) -> Result<Vec<ClusterInfo>> {
        let path = self.paths.group_info();
        let data = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_json::from_str(&data).map_err(|e| Error::io(&path, e))
    }
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Error::io(path, "tile path has no file name".to_string()))
}
