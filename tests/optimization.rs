//! End-to-end threshold optimisation on a labelled synthetic corpus.

mod common;

use std::collections::BTreeSet;

use common::*;
use lidarfuse::{
    BuildingValidationOptimizer, CancelToken, ClusterParams, Config, Phase, Thresholds,
};

const TRUE_POSITIVE: u8 = 19;
const FALSE_POSITIVE: u8 = 20;

/// 15 well-separated clusters: 9 labelled building, 6 labelled not-building
/// (40%), with cleanly separable probabilities.
fn labelled_specs() -> Vec<PointSpec> {
    let mut specs = Vec::new();
    for k in 0..15 {
        let center = (
            ORIGIN.0 + 30.0 * (k % 4) as f64 + 10.0,
            ORIGIN.1 + 30.0 * (k / 4) as f64 + 10.0,
        );
        let (label, probability) =
            if k < 9 { (TRUE_POSITIVE, 0.9) } else { (FALSE_POSITIVE, 0.1) };
        specs.extend(
            square_patch(center, 5, 0.5, 5.0, label).into_iter().map(|p| p.building(probability)),
        );
    }
    specs
}

fn study_config(root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.building_validation.cluster = ClusterParams { min_points: 10, tolerance: 0.75, is3d: true };
    config.optimization.root = root.to_path_buf();
    config.optimization.n_trials = 64;
    config.optimization.seed = 0;
    config.optimization.use_final_classification_codes = true;
    config
}

#[test]
fn full_study_reaches_perfect_metrics_on_separable_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = study_config(dir.path());

    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    lidarfuse::write_tile(&build_tile(&labelled_specs()), &inputs.join("corpus.las")).unwrap();

    let mut optimizer = BuildingValidationOptimizer::from_config(&config, CancelToken::new()).unwrap();
    let metrics = optimizer.run().unwrap().expect("evaluate phase ran");

    // Corpus composition.
    assert_eq!(metrics.groups_count, 15);
    assert!((metrics.group_no_buildings - 0.4).abs() < 1e-9);

    // On separable data the feasible optimum automates everything without a
    // single mistake.
    assert_eq!(metrics.p_auto, 1.0);
    assert_eq!(metrics.precision, 1.0);
    assert_eq!(metrics.recall, 1.0);

    // Artifacts of every phase.
    assert!(dir.path().join("prepared/corpus.las").is_file());
    assert!(dir.path().join("updated/corpus.las").is_file());
    assert!(dir.path().join("group_info.json").is_file());
    let thresholds = Thresholds::load(&dir.path().join("thresholds.json")).unwrap();
    thresholds.validate().unwrap();

    // The updated tile carries only final codes (here fully automated,
    // so no unsure group either).
    let updated = lidarfuse::read_tile(&dir.path().join("updated/corpus.las"), None).unwrap();
    let codes = config.data_format.codes.building.final_codes;
    let produced: BTreeSet<u8> = updated.classification().iter().copied().collect();
    let allowed: BTreeSet<u8> = [codes.building, codes.not_building, codes.unsure].into();
    assert!(produced.is_subset(&allowed), "unexpected codes: {produced:?}");
    assert!(produced.contains(&codes.building));
    assert!(produced.contains(&codes.not_building));
}

#[test]
fn evaluate_phase_reuses_persisted_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = study_config(dir.path());

    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    lidarfuse::write_tile(&build_tile(&labelled_specs()), &inputs.join("corpus.las")).unwrap();

    let mut optimizer = BuildingValidationOptimizer::from_config(&config, CancelToken::new()).unwrap();
    let first = optimizer.run().unwrap().expect("evaluate phase ran");

    // A fresh driver evaluating from disk reproduces the metrics exactly.
    config.optimization.todo = vec![Phase::Evaluate];
    let mut reloaded = BuildingValidationOptimizer::from_config(&config, CancelToken::new()).unwrap();
    let second = reloaded.run().unwrap().expect("evaluate phase ran");
    assert_eq!(second, first);
}

#[test]
fn cancelled_study_prepares_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = study_config(dir.path());
    config.optimization.todo = vec![Phase::Prepare];

    let inputs = dir.path().join("inputs");
    std::fs::create_dir_all(&inputs).unwrap();
    lidarfuse::write_tile(&build_tile(&labelled_specs()), &inputs.join("corpus.las")).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut optimizer = BuildingValidationOptimizer::from_config(&config, cancel).unwrap();
    optimizer.run().unwrap();

    assert!(!dir.path().join("prepared/corpus.las").exists());
}
