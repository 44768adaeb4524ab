//! Building validation: cluster candidate points, overlay them with the
//! building database, and decide confirmation/refutation per cluster.
//!
//! `prepare` adds the candidate flag, candidate cluster ids and database
//! overlay dimensions without touching the classification channel, so the
//! optimiser can reuse a prepared tile across many threshold trials.
//! `update` rewrites the classification of candidate points only.

mod thresholds;

pub use thresholds::{Range, ThresholdRanges, Thresholds};

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bduni::{fetch_building_footprints, BdUniConnectionParams, BdUniRequestParams, FetchOutcome};
use crate::cluster::{cluster_tile_where, group_indices, ClusterParams};
use crate::config::{BuildingCodes, BuildingValidationConfig, Config, DimensionNames};
use crate::error::{Error, Result};
use crate::geom::integer_bbox;
use crate::overlay::VectorLayer;
use crate::tile::{DataType, Tile};

/// Everything needed to confirm, refute, or stay unsure about one cluster
/// of candidate building points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub probabilities: Vec<f32>,
    pub overlays: Vec<u8>,
    pub entropies: Vec<f32>,
    /// Ground-truth summary of the cluster; only set when preparing an
    /// optimisation corpus, never read during production inference.
    pub target: Option<u8>,
}

/// The building validator. Construct once per configuration; `run` tiles
/// through it.
pub struct BuildingValidator {
    shp_path: Option<PathBuf>,
    bd_uni: Option<(BdUniConnectionParams, BdUniRequestParams)>,
    cluster: ClusterParams,
    thresholds: Thresholds,
    dims: DimensionNames,
    codes: BuildingCodes,
    candidate_codes: Vec<u8>,
    use_final_classification_codes: bool,
    detailed_to_final: HashMap<u8, u8>,
}

impl BuildingValidator {
    pub fn new(
        validation: &BuildingValidationConfig,
        dims: &DimensionNames,
        codes: &BuildingCodes,
        bd_uni: Option<(BdUniConnectionParams, BdUniRequestParams)>,
    ) -> Result<BuildingValidator> {
        validation.thresholds.validate()?;
        let detailed_to_final = codes.detailed_to_final_map()?;
        Ok(BuildingValidator {
            shp_path: validation.shp_path.clone(),
            bd_uni,
            cluster: validation.cluster.clone(),
            thresholds: validation.thresholds.clone(),
            dims: dims.clone(),
            codes: codes.clone(),
            candidate_codes: codes.candidates.clone(),
            use_final_classification_codes: validation.use_final_classification_codes,
            detailed_to_final,
        })
    }

    /// Assemble a validator from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Result<BuildingValidator> {
        let bd_uni = config
            .bd_uni
            .as_ref()
            .map(|db| (db.connection.clone(), db.request.clone()));
        Self::new(
            &config.building_validation,
            &config.data_format.dimensions,
            &config.data_format.codes.building,
            bd_uni,
        )
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Override the candidate code set (the optimiser widens it to the
    /// reference true-positive ∪ false-positive codes).
    pub fn set_candidate_codes(&mut self, candidate_codes: Vec<u8>) {
        self.candidate_codes = candidate_codes;
    }

    pub fn set_use_final_classification_codes(&mut self, value: bool) {
        self.use_final_classification_codes = value;
    }

    /// Prepare then update.
    pub fn run(&self, tile: &mut Tile) -> Result<()> {
        info!("preparation: clustering candidate buildings and requesting the vector database");
        self.prepare(tile)?;
        info!("update: deciding cluster classifications from AI and database evidence");
        self.update(tile)
    }

    /// Cluster candidates and overlay the building database.
    ///
    /// Adds the candidate flag, candidate cluster id and overlay dimensions;
    /// never touches `classification`, and overwrites its own outputs
    /// entirely, so running it twice leaves the tile unchanged.
    pub fn prepare(&self, tile: &mut Tile) -> Result<()> {
        // The decision step needs these; fail before any mutation.
        tile.f32_dim(&self.dims.ai_building_proba)?;
        tile.f32_dim(&self.dims.entropy)?;

        // Candidate flag from the input classification.
        let mask: Vec<bool> = tile
            .classification()
            .iter()
            .map(|code| self.candidate_codes.contains(code))
            .collect();
        tile.add_dim(&self.dims.candidate_buildings_flag, DataType::U8)?;
        let flags = tile.u8_dim_mut(&self.dims.candidate_buildings_flag)?;
        for (flag, &is_candidate) in flags.iter_mut().zip(&mask) {
            *flag = u8::from(is_candidate);
        }

        // Candidate clusters; unclustered candidates keep id 0.
        let ids = cluster_tile_where(tile, &mask, &self.cluster);
        tile.add_dim(&self.dims.cluster_id_candidates, DataType::U32)?;
        tile.u32_dim_mut(&self.dims.cluster_id_candidates)?.copy_from_slice(&ids);

        // Database overlay flag.
        tile.add_dim(&self.dims.uni_db_overlay, DataType::U8)?;
        tile.u8_dim_mut(&self.dims.uni_db_overlay)?.fill(0);
        if let Some(layer) = self.load_vector_layer(tile)? {
            if layer.is_empty() {
                debug!("vector layer holds no polygon; overlay left empty");
            } else {
                layer.overlay(tile, &self.dims.uni_db_overlay)?;
            }
        }

        Ok(())
    }

    /// Load the user-supplied layer, or fetch one from the database into a
    /// temporary directory released on return. `None` means no overlay
    /// applies (no source configured, or an empty zone).
    fn load_vector_layer(&self, tile: &Tile) -> Result<Option<VectorLayer>> {
        if let Some(shp_path) = &self.shp_path {
            return Ok(Some(VectorLayer::from_shapefile(shp_path)?));
        }

        let Some((connection, request)) = &self.bd_uni else {
            warn!("no vector source configured; database overlay left empty");
            return Ok(None);
        };

        let srid = tile.epsg().ok_or_else(|| {
            Error::InvalidConfig(
                "epsg is neither configured nor present in the tile header".to_string(),
            )
        })?;
        let bbox = integer_bbox(tile, request.buffer);

        let workdir = tempfile::tempdir()
            .map_err(|e| Error::io(std::env::temp_dir(), e))?;
        let shapefile_path = workdir.path().join("bduni_footprints.shp");
        match fetch_building_footprints(connection, request, &shapefile_path, bbox, srid)? {
            FetchOutcome::Polygons(path) => Ok(Some(VectorLayer::from_shapefile(&path)?)),
            FetchOutcome::Empty => {
                debug!("empty zone: no building or reservoir under the tile");
                Ok(None)
            }
        }
        // `workdir` drops here, removing the fetched layer on every path.
    }

    /// Rewrite the classification of candidate points from per-cluster
    /// decisions. Non-candidate points are never touched.
    pub fn update(&self, tile: &mut Tile) -> Result<()> {
        let flags = tile.u8_dim(&self.dims.candidate_buildings_flag)?.to_vec();
        let ids = tile.u32_dim(&self.dims.cluster_id_candidates)?.to_vec();

        // Preset every candidate to `not_building` so unclustered noise
        // keeps a deterministic code.
        let preset = self.codes.final_codes.not_building;
        {
            let classification = tile.classification_mut();
            for (code, &flag) in classification.iter_mut().zip(&flags) {
                if flag == 1 {
                    *code = preset;
                }
            }
        }

        for (_, members) in group_indices(&ids) {
            let info = self.extract_cluster_info(tile, &members, None)?;
            let decision = self.decide(&info);
            let classification = tile.classification_mut();
            for i in members {
                classification[i] = decision;
            }
        }

        Ok(())
    }

    /// Gather the decision inputs of one cluster. `targets` carries the
    /// reference classification when preparing an optimisation corpus.
    pub(crate) fn extract_cluster_info(
        &self,
        tile: &Tile,
        members: &[usize],
        target: Option<u8>,
    ) -> Result<ClusterInfo> {
        let probabilities_dim = tile.f32_dim(&self.dims.ai_building_proba)?;
        let overlays_dim = tile.u8_dim(&self.dims.uni_db_overlay)?;
        let entropies_dim = tile.f32_dim(&self.dims.entropy)?;

        Ok(ClusterInfo {
            probabilities: members.iter().map(|&i| probabilities_dim[i]).collect(),
            overlays: members.iter().map(|&i| overlays_dim[i]).collect(),
            entropies: members.iter().map(|&i| entropies_dim[i]).collect(),
            target,
        })
    }

    /// Cluster-level decision in the configured code form.
    pub fn decide(&self, info: &ClusterInfo) -> u8 {
        if self.use_final_classification_codes {
            self.decide_final(info)
        } else {
            self.decide_detailed(info)
        }
    }

    /// The detailed decision collapsed onto {building, not_building, unsure}.
    pub fn decide_final(&self, info: &ClusterInfo) -> u8 {
        self.decide_final_with(&self.thresholds, info)
    }

    /// As [`Self::decide_final`], under trial thresholds (the optimiser's
    /// inner loop re-scores prepared clusters without touching the
    /// validator).
    pub fn decide_final_with(&self, thresholds: &Thresholds, info: &ClusterInfo) -> u8 {
        self.detailed_to_final[&self.decide_detailed_with(thresholds, info)]
    }

    /// The seven-way decision tree; first matching rule wins.
    pub fn decide_detailed(&self, info: &ClusterInfo) -> u8 {
        self.decide_detailed_with(&self.thresholds, info)
    }

    /// As [`Self::decide_detailed`], under trial thresholds.
    pub fn decide_detailed_with(&self, thresholds: &Thresholds, info: &ClusterInfo) -> u8 {
        let t = thresholds;
        let detailed = &self.codes.detailed;

        let high_entropy = mean_where(&info.entropies, |&e| {
            f64::from(e) >= t.min_entropy_uncertainty
        }) >= t.min_frac_entropy_uncertain;

        // Confirmation: the confidence bar is relaxed under a database
        // polygon.
        let relaxed = t.min_confidence_confirmation
            * t.min_frac_confirmation_factor_if_bd_uni_overlay;
        let ia_confirmed = mean_where2(&info.probabilities, &info.overlays, |&p, &o| {
            f64::from(p) >= t.min_confidence_confirmation
                || (o > 0 && f64::from(p) >= relaxed)
        }) >= t.min_frac_confirmation;

        let ia_refuted = mean_where(&info.probabilities, |&p| {
            1.0 - f64::from(p) >= t.min_confidence_refutation
        }) >= t.min_frac_refutation;

        let overlay_frac = info.overlays.iter().map(|&o| f64::from(o.min(1))).sum::<f64>()
            / info.overlays.len().max(1) as f64;
        let uni_overlayed = overlay_frac >= t.min_uni_db_overlay_frac;

        if high_entropy {
            return detailed.unsure_by_entropy;
        }
        if ia_refuted {
            if uni_overlayed {
                return detailed.ia_refuted_but_under_db_uni;
            }
            return detailed.ia_refuted;
        }
        if ia_confirmed {
            if uni_overlayed {
                return detailed.both_confirmed;
            }
            return detailed.ia_confirmed_only;
        }
        if uni_overlayed {
            return detailed.db_overlayed_only;
        }
        detailed.both_unsure
    }
}

/// Fraction of elements satisfying the predicate; 0 for an empty slice.
fn mean_where<T>(values: &[T], predicate: impl Fn(&T) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| predicate(v)).count() as f64 / values.len() as f64
}

/// Fraction of paired elements satisfying the predicate; 0 when empty.
fn mean_where2<A, B>(a: &[A], b: &[B], predicate: impl Fn(&A, &B) -> bool) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "paired columns must have equal length");
    if a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).filter(|(x, y)| predicate(x, y)).count() as f64 / a.len() as f64
}
