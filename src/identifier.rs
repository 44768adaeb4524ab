//! Building identification: group non-candidate points that nonetheless
//! carry a high building probability, for downstream inspection.
//!
//! Groups are written as dense positive ids into their own dimension so
//! later tools can review them without re-deriving anything. As a standalone
//! tool the identifier can also reclassify the grouped points directly.

use tracing::info;

use crate::cluster::{cluster_tile_where, ClusterParams};
use crate::config::{BuildingCodes, BuildingIdentificationConfig, Config, DimensionNames};
use crate::error::Result;
use crate::tile::{DataType, Tile};

pub struct BuildingIdentifier {
    min_building_proba: f64,
    cluster: ClusterParams,
    standalone: bool,
    dims: DimensionNames,
    codes: BuildingCodes,
}

impl BuildingIdentifier {
    pub fn new(
        identification: &BuildingIdentificationConfig,
        dims: &DimensionNames,
        codes: &BuildingCodes,
    ) -> BuildingIdentifier {
        BuildingIdentifier {
            min_building_proba: identification.min_building_proba,
            cluster: identification.cluster.clone(),
            standalone: identification.standalone,
            dims: dims.clone(),
            codes: codes.clone(),
        }
    }

    pub fn from_config(config: &Config) -> BuildingIdentifier {
        Self::new(
            &config.building_identification,
            &config.data_format.dimensions,
            &config.data_format.codes.building,
        )
    }

    /// Group the remaining high-probability points into the AI-group
    /// dimension. Points already classified as building are skipped.
    pub fn run(&self, tile: &mut Tile) -> Result<()> {
        info!("identification of building groups among unconfirmed points");

        let building = self.codes.final_codes.building;
        let probabilities = tile.f32_dim(&self.dims.ai_building_proba)?;
        let mask: Vec<bool> = tile
            .classification()
            .iter()
            .zip(probabilities)
            .map(|(&code, &p)| f64::from(p) >= self.min_building_proba && code != building)
            .collect();

        let ids = cluster_tile_where(tile, &mask, &self.cluster);
        tile.add_dim(&self.dims.ai_building_identified, DataType::U32)?;
        tile.u32_dim_mut(&self.dims.ai_building_identified)?.copy_from_slice(&ids);

        if self.standalone {
            let classification = tile.classification_mut();
            for (code, &id) in classification.iter_mut().zip(&ids) {
                if id > 0 {
                    *code = building;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Codes;
    use crate::tile::test_support::tile_from_xyz;

    fn identification(standalone: bool) -> BuildingIdentificationConfig {
        BuildingIdentificationConfig {
            min_building_proba: 0.5,
            cluster: ClusterParams { min_points: 3, tolerance: 1.0, is3d: false },
            standalone,
        }
    }

    fn tile_with_probas(probas: &[f32], classification: &[u8]) -> Tile {
        let coords: Vec<(f64, f64, f64)> =
            (0..probas.len()).map(|i| (i as f64 * 0.5, 0.0, 0.0)).collect();
        let mut tile = tile_from_xyz(&coords);
        tile.add_dim("building", DataType::F32).unwrap();
        tile.f32_dim_mut("building").unwrap().copy_from_slice(probas);
        tile.classification_mut().copy_from_slice(classification);
        tile
    }

    #[test]
    fn groups_high_probability_non_buildings_without_reclassifying() {
        let mut tile = tile_with_probas(&[0.9, 0.9, 0.9, 0.2, 0.9], &[2, 2, 2, 2, 6]);
        let identifier = BuildingIdentifier::new(
            &identification(false),
            &DimensionNames::default(),
            &Codes::default().building,
        );
        identifier.run(&mut tile).unwrap();

        // The already-building point and the weak point are excluded; the
        // remaining three form one group.
        assert_eq!(tile.u32_dim("Group").unwrap(), &[1, 1, 1, 0, 0]);
        assert_eq!(tile.classification(), &[2, 2, 2, 2, 6]);
    }

    #[test]
    fn standalone_mode_reclassifies_grouped_points() {
        let mut tile = tile_with_probas(&[0.9, 0.9, 0.9, 0.2, 0.9], &[2, 2, 2, 2, 6]);
        let identifier = BuildingIdentifier::new(
            &identification(true),
            &DimensionNames::default(),
            &Codes::default().building,
        );
        identifier.run(&mut tile).unwrap();

        assert_eq!(tile.classification(), &[6, 6, 6, 2, 6]);
    }
}
