//! Building completion: rescue candidate points too isolated for the
//! validator to cluster, when their probability is high enough and they sit
//! next to a confirmed building.
//!
//! Isolated survivors are clustered in 2D together with already-confirmed
//! building points; any group containing at least one confirmed point is
//! promoted wholesale. The completor never demotes a point.

use tracing::info;

use crate::cluster::{cluster_tile_where, group_indices, ClusterParams};
use crate::config::{BuildingCompletionConfig, BuildingCodes, Config, DimensionNames};
use crate::error::Result;
use crate::tile::{DataType, Tile};

pub struct BuildingCompletor {
    min_building_proba: f64,
    relaxation_if_bd_uni_overlay: f64,
    cluster: ClusterParams,
    dims: DimensionNames,
    codes: BuildingCodes,
}

impl BuildingCompletor {
    pub fn new(
        completion: &BuildingCompletionConfig,
        dims: &DimensionNames,
        codes: &BuildingCodes,
    ) -> BuildingCompletor {
        BuildingCompletor {
            min_building_proba: completion.min_building_proba,
            relaxation_if_bd_uni_overlay: completion.min_building_proba_relaxation_if_bd_uni_overlay,
            cluster: completion.cluster.clone(),
            dims: dims.clone(),
            codes: codes.clone(),
        }
    }

    pub fn from_config(config: &Config) -> BuildingCompletor {
        Self::new(
            &config.building_completion,
            &config.data_format.dimensions,
            &config.data_format.codes.building,
        )
    }

    /// Promote isolated high-probability candidates that co-cluster with
    /// confirmed buildings. Requires the validator's prepared dimensions and
    /// its final building code in `classification`.
    pub fn run(&self, tile: &mut Tile) -> Result<()> {
        info!("completion of buildings with isolated points of high probability");

        let building = self.codes.final_codes.building;
        let mask = self.completion_mask(tile)?;

        let ids = cluster_tile_where(tile, &mask, &self.cluster);
        tile.add_dim(&self.dims.cluster_id_isolated_plus_confirmed, DataType::U32)?;
        tile.u32_dim_mut(&self.dims.cluster_id_isolated_plus_confirmed)?.copy_from_slice(&ids);

        for (_, members) in group_indices(&ids) {
            let classification = tile.classification_mut();
            if members.iter().any(|&i| classification[i] == building) {
                for i in members {
                    classification[i] = building;
                }
            }
        }

        Ok(())
    }

    /// Points to co-cluster: confirmed buildings, plus unclustered
    /// candidates whose probability clears the (possibly relaxed) bar.
    fn completion_mask(&self, tile: &Tile) -> Result<Vec<bool>> {
        let flags = tile.u8_dim(&self.dims.candidate_buildings_flag)?;
        let candidate_ids = tile.u32_dim(&self.dims.cluster_id_candidates)?;
        let overlays = tile.u8_dim(&self.dims.uni_db_overlay)?;
        let probabilities = tile.f32_dim(&self.dims.ai_building_proba)?;
        let classification = tile.classification();

        let relaxed = self.min_building_proba * self.relaxation_if_bd_uni_overlay;
        let building = self.codes.final_codes.building;

        Ok((0..tile.len())
            .map(|i| {
                let p = f64::from(probabilities[i]);
                let isolated_with_high_p = flags[i] == 1
                    && candidate_ids[i] == 0
                    && (p >= self.min_building_proba || (overlays[i] > 0 && p >= relaxed));
                isolated_with_high_p || classification[i] == building
            })
            .collect())
    }
}
