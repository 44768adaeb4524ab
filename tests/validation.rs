//! Cluster-level validation scenarios on synthetic tiles.

mod common;

use common::*;
use lidarfuse::{
    BuildingValidationConfig, BuildingValidator, ClusterParams, Codes, DimensionNames,
};

const CANDIDATE: u8 = 6;

fn validator_with(
    shp_path: Option<std::path::PathBuf>,
    use_final: bool,
) -> BuildingValidator {
    let mut codes = Codes::default().building;
    codes.candidates = vec![CANDIDATE];
    let validation = BuildingValidationConfig {
        shp_path,
        cluster: ClusterParams { min_points: 10, tolerance: 0.75, is3d: true },
        use_final_classification_codes: use_final,
        ..Default::default()
    };
    BuildingValidator::new(&validation, &DimensionNames::default(), &codes, None).unwrap()
}

fn candidate_cluster(building: f32, entropy: f32) -> Vec<PointSpec> {
    square_patch((ORIGIN.0 + 50.0, ORIGIN.1 + 50.0), 10, 0.5, 10.0, CANDIDATE)
        .into_iter()
        .map(|p| p.building(building).entropy(entropy))
        .collect()
}

#[test]
fn perfect_cluster_under_database_is_confirmed_as_building() {
    let specs = candidate_cluster(0.95, 0.0);
    let mut tile = build_tile(&specs);

    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("buildings.shp");
    write_presence_shapefile(&shp, &[covering_rectangle(&specs, 1.0)]);

    let validator = validator_with(Some(shp), true);
    validator.run(&mut tile).unwrap();

    let building = Codes::default().building.final_codes.building;
    assert!(tile.classification().iter().all(|&code| code == building));

    // Candidate subset invariant: clustered implies flagged.
    let flags = tile.u8_dim("BuildingsCandidateFlag").unwrap();
    let ids = tile.u32_dim("ClusterID_candidate_building").unwrap();
    for (&id, &flag) in ids.iter().zip(flags) {
        assert!(id == 0 || flag == 1);
    }
    assert!(tile.u8_dim("BDTopoOverlay").unwrap().iter().all(|&o| o == 1));
}

#[test]
fn refuted_cluster_under_database_gets_the_dedicated_detailed_code() {
    let specs = candidate_cluster(0.05, 0.0);
    let mut tile = build_tile(&specs);

    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("buildings.shp");
    write_presence_shapefile(&shp, &[covering_rectangle(&specs, 1.0)]);

    let detailed = validator_with(Some(shp.clone()), false);
    detailed.run(&mut tile).unwrap();
    let codes = Codes::default().building;
    assert!(tile
        .classification()
        .iter()
        .all(|&code| code == codes.detailed.ia_refuted_but_under_db_uni));

    // Same tile through the final-code form collapses to not_building.
    let mut tile = build_tile(&specs);
    let final_form = validator_with(Some(shp), true);
    final_form.run(&mut tile).unwrap();
    assert!(tile.classification().iter().all(|&code| code == codes.final_codes.not_building));
}

#[test]
fn entropy_veto_overrides_confirmation() {
    let specs = candidate_cluster(0.95, 0.9);
    let mut tile = build_tile(&specs);

    let validator = validator_with(None, false);
    validator.run(&mut tile).unwrap();

    let codes = Codes::default().building;
    assert!(tile.classification().iter().all(|&code| code == codes.detailed.unsure_by_entropy));
}

#[test]
fn non_candidate_points_are_never_rewritten() {
    let mut specs = candidate_cluster(0.95, 0.0);
    // Ground and unclassified bystanders with misleading probabilities.
    specs.push(PointSpec::new(ORIGIN.0 + 5.0, ORIGIN.1 + 5.0, 0.0, 2).building(0.99));
    specs.push(PointSpec::new(ORIGIN.0 + 6.0, ORIGIN.1 + 5.0, 0.0, 1).building(0.99));
    let mut tile = build_tile(&specs);

    let validator = validator_with(None, true);
    validator.run(&mut tile).unwrap();

    let n = tile.len();
    assert_eq!(tile.classification()[n - 2], 2);
    assert_eq!(tile.classification()[n - 1], 1);
}

#[test]
fn unclustered_candidates_fall_back_to_not_building() {
    // A single candidate point cannot reach min_points.
    let specs =
        vec![PointSpec::new(ORIGIN.0 + 10.0, ORIGIN.1 + 10.0, 5.0, CANDIDATE).building(0.99)];
    let mut tile = build_tile(&specs);

    let validator = validator_with(None, true);
    validator.run(&mut tile).unwrap();

    let codes = Codes::default().building;
    assert_eq!(tile.classification(), &[codes.final_codes.not_building]);
    assert_eq!(tile.u32_dim("ClusterID_candidate_building").unwrap(), &[0]);
}

#[test]
fn preparation_is_idempotent_and_update_is_stable() {
    let specs = candidate_cluster(0.95, 0.0);

    let validator = validator_with(None, true);

    let mut once = build_tile(&specs);
    validator.prepare(&mut once).unwrap();
    let mut twice = build_tile(&specs);
    validator.prepare(&mut twice).unwrap();
    validator.prepare(&mut twice).unwrap();

    assert_eq!(once.classification(), twice.classification());
    assert_eq!(
        once.u32_dim("ClusterID_candidate_building").unwrap(),
        twice.u32_dim("ClusterID_candidate_building").unwrap()
    );
    assert_eq!(
        once.u8_dim("BuildingsCandidateFlag").unwrap(),
        twice.u8_dim("BuildingsCandidateFlag").unwrap()
    );

    // Updating twice decides exactly as updating once.
    validator.update(&mut once).unwrap();
    let after_first = once.classification().to_vec();
    validator.update(&mut once).unwrap();
    assert_eq!(once.classification(), &after_first[..]);
}

#[test]
fn empty_overlay_source_matches_a_zeroed_overlay() {
    // Far-away polygons cover nothing: decisions must match the no-source
    // run where the overlay dimension stays zeroed.
    let specs = candidate_cluster(0.95, 0.0);

    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("far_away.shp");
    write_presence_shapefile(
        &shp,
        &[(ORIGIN.0 - 500.0, ORIGIN.1 - 500.0, ORIGIN.0 - 400.0, ORIGIN.1 - 400.0)],
    );

    let mut with_far_layer = build_tile(&specs);
    validator_with(Some(shp), true).run(&mut with_far_layer).unwrap();

    let mut without_source = build_tile(&specs);
    validator_with(None, true).run(&mut without_source).unwrap();

    assert_eq!(with_far_layer.classification(), without_source.classification());
    assert!(with_far_layer.u8_dim("BDTopoOverlay").unwrap().iter().all(|&o| o == 0));
}

#[test]
fn update_before_prepare_is_a_missing_dimension_error() {
    let specs = candidate_cluster(0.95, 0.0);
    let mut tile = build_tile(&specs);
    let validator = validator_with(None, true);
    assert!(matches!(
        validator.update(&mut tile),
        Err(lidarfuse::Error::MissingDimension(_))
    ));
}

#[test]
fn prepare_requires_probability_and_entropy_channels() {
    let specs = candidate_cluster(0.95, 0.0);
    let mut tile = build_tile(&specs);
    tile.retain_dims(|name| name != "entropy");

    let validator = validator_with(None, true);
    assert!(matches!(
        validator.prepare(&mut tile),
        Err(lidarfuse::Error::MissingDimension(name)) if name == "entropy"
    ));
}
