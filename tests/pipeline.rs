//! Full-pipeline and persistence round-trip scenarios.

mod common;

use std::collections::BTreeSet;

use common::*;
use lidarfuse::{
    process_one_file, read_tile, write_tile, ClusterParams, Config, DataType,
};

const CANDIDATE: u8 = 6;
const GROUND: u8 = 2;
const UNCLASSIFIED: u8 = 1;

fn pipeline_config() -> Config {
    let mut config = Config::default();
    config.data_format.codes.building.candidates = vec![CANDIDATE];
    // Asymmetric confidences leave a dead zone where neither rule fires,
    // so mid-probability clusters land on `unsure`.
    config.building_validation.thresholds.min_confidence_confirmation = 0.6;
    config.building_validation.thresholds.min_confidence_refutation = 0.8;
    config.building_validation.cluster = ClusterParams { min_points: 10, tolerance: 0.75, is3d: true };
    config.building_completion.cluster = ClusterParams { min_points: 3, tolerance: 2.0, is3d: false };
    config.building_identification.cluster =
        ClusterParams { min_points: 10, tolerance: 0.75, is3d: true };
    config
}

/// The reference subset: ground, unclassified points, three candidate
/// clusters of distinct fates, an isolated candidate next to the confirmed
/// one, and a non-candidate group with building-level probabilities.
fn reference_specs() -> Vec<PointSpec> {
    let mut specs = Vec::new();

    // Ground carpet and a few unclassified points.
    specs.extend(
        square_patch((ORIGIN.0 + 50.0, ORIGIN.1 + 50.0), 8, 10.0, 0.0, GROUND)
            .into_iter()
            .map(|p| p.building(0.02)),
    );
    specs.extend(
        square_patch((ORIGIN.0 + 15.0, ORIGIN.1 + 80.0), 3, 1.0, 2.0, UNCLASSIFIED)
            .into_iter()
            .map(|p| p.building(0.1)),
    );

    // Candidate cluster confirmed by probability.
    let confirmed = square_patch((ORIGIN.0 + 20.0, ORIGIN.1 + 20.0), 10, 0.5, 10.0, CANDIDATE)
        .into_iter()
        .map(|p| p.building(0.95));
    specs.extend(confirmed);

    // One isolated candidate 1.5 m east of the confirmed cluster, to be
    // rescued by completion.
    specs.push(
        PointSpec::new(ORIGIN.0 + 20.0 + 2.25 + 1.5, ORIGIN.1 + 20.0, 10.0, CANDIDATE)
            .building(0.8),
    );

    // Candidate cluster refuted by probability.
    specs.extend(
        square_patch((ORIGIN.0 + 60.0, ORIGIN.1 + 20.0), 10, 0.5, 6.0, CANDIDATE)
            .into_iter()
            .map(|p| p.building(0.03)),
    );

    // Candidate cluster in the dead zone: unsure.
    specs.extend(
        square_patch((ORIGIN.0 + 20.0, ORIGIN.1 + 60.0), 10, 0.5, 7.0, CANDIDATE)
            .into_iter()
            .map(|p| p.building(0.45)),
    );

    // Non-candidate points with building-level probabilities, for the
    // identifier to group without reclassifying.
    specs.extend(
        square_patch((ORIGIN.0 + 80.0, ORIGIN.1 + 80.0), 4, 0.5, 12.0, GROUND)
            .into_iter()
            .map(|p| p.building(0.9)),
    );

    specs
}

#[test]
fn full_pipeline_produces_only_known_codes_and_preserves_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("870000_6618000.subset.las");
    let target = dir.path().join("out/870000_6618000.subset.las");

    let specs = reference_specs();
    write_tile(&build_tile(&specs), &src).unwrap();

    let config = pipeline_config();
    process_one_file(&config, &src, &target).unwrap();

    let input = read_tile(&src, None).unwrap();
    let output = read_tile(&target, None).unwrap();

    // Point count and geometry are unchanged, bit for bit.
    assert_eq!(output.len(), input.len());
    for i in 0..input.len() {
        assert_eq!(output.xyz(i), input.xyz(i));
    }

    // Only input bystander codes and the three final codes survive.
    let final_codes = config.data_format.codes.building.final_codes;
    let allowed: BTreeSet<u8> = [
        UNCLASSIFIED,
        GROUND,
        final_codes.building,
        final_codes.not_building,
        final_codes.unsure,
    ]
    .into();
    let produced: BTreeSet<u8> = output.classification().iter().copied().collect();
    assert!(produced.is_subset(&allowed), "unexpected codes: {produced:?}");

    // Every fate is represented: confirmed, rescued, refuted, unsure.
    assert!(produced.contains(&final_codes.building));
    assert!(produced.contains(&final_codes.not_building));
    assert!(produced.contains(&final_codes.unsure));

    // The rescued isolated point follows its confirmed neighbours.
    let rescued_index = 64 + 9 + 100; // ground + unclassified + confirmed cluster
    assert_eq!(output.classification()[rescued_index], final_codes.building);

    // The identifier grouped the high-probability ground patch without
    // touching its classification.
    let groups = output.u32_dim("Group").unwrap();
    let tail = &groups[output.len() - 16..];
    assert!(tail.iter().all(|&id| id > 0));
    assert!(output.classification()[output.len() - 16..].iter().all(|&code| code == GROUND));
}

#[test]
fn read_write_round_trip_preserves_geometry_header_and_extras() {
    let dir = tempfile::tempdir().unwrap();
    let first_path = dir.path().join("first.las");
    let second_path = dir.path().join("second.las");

    let mut tile = build_tile(&reference_specs());
    tile.add_dim("BDTopoOverlay", DataType::U8).unwrap();
    tile.u8_dim_mut("BDTopoOverlay").unwrap()[3] = 1;
    write_tile(&tile, &first_path).unwrap();

    let first = read_tile(&first_path, None).unwrap();
    write_tile(&first, &second_path).unwrap();
    let second = read_tile(&second_path, None).unwrap();

    assert_eq!(second.len(), first.len());
    for i in 0..first.len() {
        assert_eq!(second.xyz(i), first.xyz(i));
        assert_eq!(second.intensity(i), first.intensity(i));
    }
    assert_eq!(second.classification(), first.classification());

    // Header metadata survives.
    assert_eq!(second.header().version(), first.header().version());
    assert_eq!(
        second.header().point_format().to_u8().unwrap(),
        first.header().point_format().to_u8().unwrap()
    );
    assert_eq!(second.header().transforms(), first.header().transforms());

    // Extra dimensions survive with names, order and values.
    let first_names: Vec<_> = first.extra_dim_names().collect();
    let second_names: Vec<_> = second.extra_dim_names().collect();
    assert_eq!(second_names, first_names);
    assert_eq!(second.f32_dim("building").unwrap(), first.f32_dim("building").unwrap());
    assert_eq!(second.u8_dim("BDTopoOverlay").unwrap(), first.u8_dim("BDTopoOverlay").unwrap());
}

#[test]
fn batch_apply_skips_broken_tiles_and_processes_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();

    write_tile(&build_tile(&reference_specs()), &inputs.join("good.las")).unwrap();
    std::fs::write(inputs.join("broken.las"), b"not a las file").unwrap();

    let mut config = pipeline_config();
    config.paths.src_las = inputs.clone();
    config.paths.output_dir = dir.path().join("outputs");

    let processed = lidarfuse::apply(&config, &lidarfuse::CancelToken::new()).unwrap();
    assert_eq!(processed.len(), 1);
    assert!(config.paths.output_dir.join("good.las").is_file());
    assert!(!config.paths.output_dir.join("broken.las").exists());
}

#[test]
fn cancelled_batch_processes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    write_tile(&build_tile(&reference_specs()), &inputs.join("tile.las")).unwrap();

    let mut config = pipeline_config();
    config.paths.src_las = inputs;
    config.paths.output_dir = dir.path().join("outputs");

    let cancel = lidarfuse::CancelToken::new();
    cancel.cancel();
    let processed = lidarfuse::apply(&config, &cancel).unwrap();
    assert!(processed.is_empty());
}
