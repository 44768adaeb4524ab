//! Batch orchestration: discover tiles, chain the building tasks over each
//! one, and persist the results.
//!
//! A failure on one tile is logged and skipped; the batch continues. All
//! intermediate state lives in memory and in scope-bound temporaries, so a
//! cancelled or failed tile persists nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::basic::BasicIdentifier;
use crate::cleaning::Cleaner;
use crate::completor::BuildingCompletor;
use crate::config::{BuildingValidationConfig, Config};
use crate::error::{Error, Result};
use crate::identifier::BuildingIdentifier;
use crate::tile::{read_tile, write_tile};
use crate::validator::BuildingValidator;

/// Cooperative cancellation handle, checked between tiles and between
/// optimiser trials.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tiles under `src`: the file itself, or every `.las` / `.laz` found
/// recursively (extension matched case-insensitively), sorted for
/// deterministic batch order.
pub fn find_tile_paths(src: &Path) -> Result<Vec<PathBuf>> {
    if src.is_file() {
        return Ok(vec![src.to_path_buf()]);
    }
    if !src.is_dir() {
        return Err(Error::io(src, "no such file or directory".to_string()));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(src)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension().is_some_and(|ext| {
                ext.eq_ignore_ascii_case("las") || ext.eq_ignore_ascii_case("laz")
            })
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Run `logic` over every tile under the configured source, writing each
/// result next to its input name under the output directory. Per-tile
/// failures are logged and skipped.
pub fn applying(
    config: &Config,
    cancel: &CancelToken,
    logic: impl Fn(&Config, &Path, &Path) -> Result<PathBuf> + Sync,
) -> Result<Vec<PathBuf>> {
    let started = Instant::now();
    let sources = find_tile_paths(&config.paths.src_las)?;
    info!("processing {} tile(s)", sources.len());

    let processed: Vec<PathBuf> = sources
        .par_iter()
        .filter_map(|src| {
            if cancel.is_cancelled() {
                return None;
            }
            let file_name = src.file_name()?;
            let target = config.paths.output_dir.join(file_name);
            match logic(config, src, &target) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("skipping {}: {e:#}", src.display());
                    None
                }
            }
        })
        .collect();

    info!(
        "processed {}/{} tile(s) in {:.2}s",
        processed.len(),
        sources.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(processed)
}

/// The default batch: building validation, completion and identification on
/// every tile.
pub fn apply(config: &Config, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    applying(config, cancel, process_one_file)
}

/// Augment one tile's rule-based classification with deep-learning
/// probabilities and the vector building database, then persist it.
pub fn process_one_file(config: &Config, src: &Path, target: &Path) -> Result<PathBuf> {
    let started = Instant::now();
    info!("processing {}", src.display());

    let mut tile = read_tile(src, config.data_format.epsg)?;

    // Keep only the inputs the pipeline needs, to bound memory.
    Cleaner::new(&config.data_format.cleaning.input).remove_dimensions(&mut tile);

    // Validate buildings (unsure/confirmed/refuted) on a per-group basis.
    // Completion relies on the final building code, so final codes are
    // forced here regardless of the configured flag.
    let validation = BuildingValidationConfig {
        use_final_classification_codes: true,
        ..config.building_validation.clone()
    };
    let bd_uni = config.bd_uni.as_ref().map(|db| (db.connection.clone(), db.request.clone()));
    let validator = BuildingValidator::new(
        &validation,
        &config.data_format.dimensions,
        &config.data_format.codes.building,
        bd_uni,
    )?;
    validator.run(&mut tile)?;

    // Complete buildings with isolated points that are nevertheless
    // confident enough.
    BuildingCompletor::from_config(config).run(&mut tile)?;

    // Group the remaining high-probability points for inspection.
    BuildingIdentifier::from_config(config).run(&mut tile)?;

    // Publish only the configured output dimensions.
    Cleaner::new(&config.data_format.cleaning.output).remove_dimensions(&mut tile);
    write_tile(&tile, target)?;

    info!(
        "saved {} ({:.2}s)",
        target.display(),
        started.elapsed().as_secs_f64()
    );
    Ok(target.to_path_buf())
}

/// Detect vegetation and unclassified points by thresholding their
/// probabilities into the shared result dimension, then persist.
pub fn detect_vegetation_unclassified(
    config: &Config,
    src: &Path,
    target: &Path,
) -> Result<PathBuf> {
    info!("detecting vegetation/unclassified on {}", src.display());
    let dims = &config.data_format.dimensions;
    let codes = &config.data_format.codes;
    let mut tile = read_tile(src, config.data_format.epsg)?;

    BasicIdentifier::new(
        config.vegetation_identification.vegetation_threshold,
        &dims.ai_vegetation_proba,
        &dims.ai_vegetation_unclassified_groups,
        u32::from(codes.vegetation),
    )
    .identify(&mut tile)?;

    BasicIdentifier::new(
        config.vegetation_identification.unclassified_threshold,
        &dims.ai_unclassified_proba,
        &dims.ai_vegetation_unclassified_groups,
        u32::from(codes.unclassified),
    )
    .identify(&mut tile)?;

    Cleaner::new(&config.data_format.cleaning.output).remove_dimensions(&mut tile);
    write_tile(&tile, target)?;
    Ok(target.to_path_buf())
}

/// Strip a tile down to the configured input dimensions and persist it.
pub fn just_clean(config: &Config, src: &Path, target: &Path) -> Result<PathBuf> {
    info!("cleaning {}", src.display());
    Cleaner::new(&config.data_format.cleaning.input).run(src, target, config.data_format.epsg)?;
    Ok(target.to_path_buf())
}
