//! Per-point threshold identification (vegetation / unclassified), with an
//! optional intersection-over-union evaluation against reference labels.
//!
//! Advisory companion to the building pipeline: it shares the tile facade
//! and the threshold-sweep infrastructure but nothing downstream depends
//! on it.

use std::fmt;

use tracing::info;

use crate::error::Result;
use crate::tile::{DataType, Tile};

/// An intersection-over-union score with the counts it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoU {
    pub true_positive: u64,
    pub false_negative: u64,
    pub false_positive: u64,
    pub iou: f64,
}

impl IoU {
    pub fn new(true_positive: u64, false_negative: u64, false_positive: u64) -> IoU {
        let union = true_positive + false_negative + false_positive;
        let iou = if union == 0 { 0.0 } else { true_positive as f64 / union as f64 };
        IoU { true_positive, false_negative, false_positive, iou }
    }

    /// Score a predicted mask against the reference mask.
    pub fn from_masks(predicted: &[bool], truth: &[bool]) -> IoU {
        debug_assert_eq!(predicted.len(), truth.len(), "masks must have equal length");
        let mut true_positive = 0;
        let mut false_negative = 0;
        let mut false_positive = 0;
        for (&p, &t) in predicted.iter().zip(truth) {
            match (p, t) {
                (true, true) => true_positive += 1,
                (false, true) => false_negative += 1,
                (true, false) => false_positive += 1,
                (false, false) => {}
            }
        }
        IoU::new(true_positive, false_negative, false_positive)
    }

    /// Pool several per-tile scores into a corpus-level score.
    pub fn combine(scores: &[IoU]) -> IoU {
        IoU::new(
            scores.iter().map(|s| s.true_positive).sum(),
            scores.iter().map(|s| s.false_negative).sum(),
            scores.iter().map(|s| s.false_positive).sum(),
        )
    }
}

impl fmt::Display for IoU {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoU: {:.3} | true positive: {} | false negative: {} | false positive: {}",
            self.iou, self.true_positive, self.false_negative, self.false_positive
        )
    }
}

/// Set `result_code` in `result_dim` wherever `proba_dim` reaches the
/// threshold; optionally score the selection against reference codes found
/// in the classification channel.
pub struct BasicIdentifier {
    threshold: f64,
    proba_dim: String,
    result_dim: String,
    result_code: u32,
    truth_codes: Option<Vec<u8>>,
}

impl BasicIdentifier {
    pub fn new(threshold: f64, proba_dim: &str, result_dim: &str, result_code: u32) -> BasicIdentifier {
        BasicIdentifier {
            threshold,
            proba_dim: proba_dim.to_string(),
            result_dim: result_dim.to_string(),
            result_code,
            truth_codes: None,
        }
    }

    /// Evaluate the selection against these classification codes.
    pub fn with_truth_codes(mut self, codes: Vec<u8>) -> BasicIdentifier {
        self.truth_codes = Some(codes);
        self
    }

    /// Apply the threshold; the result dimension is added when missing.
    /// Returns the IoU when truth codes were supplied.
    pub fn identify(&self, tile: &mut Tile) -> Result<Option<IoU>> {
        let mask: Vec<bool> = tile
            .f32_dim(&self.proba_dim)?
            .iter()
            .map(|&p| f64::from(p) >= self.threshold)
            .collect();

        tile.add_dim(&self.result_dim, DataType::U32)?;
        let results = tile.u32_dim_mut(&self.result_dim)?;
        for (value, &selected) in results.iter_mut().zip(&mask) {
            if selected {
                *value = self.result_code;
            }
        }

        let Some(truth_codes) = &self.truth_codes else { return Ok(None) };
        let truth: Vec<bool> =
            tile.classification().iter().map(|code| truth_codes.contains(code)).collect();
        Ok(Some(IoU::from_masks(&mask, &truth)))
    }
}

/// Grid sweep of the identification threshold over a labelled corpus,
/// keeping the IoU-maximising value.
pub struct BasicIdentifierOptimizer {
    pub proba_dim: String,
    pub result_dim: String,
    pub result_code: u32,
    pub truth_codes: Vec<u8>,
    /// Candidate thresholds, swept in order.
    pub grid: Vec<f64>,
}

impl BasicIdentifierOptimizer {
    /// Evaluate every candidate threshold across the tiles; ties keep the
    /// earliest candidate.
    pub fn optimize(&self, tiles: &mut [Tile]) -> Result<(f64, IoU)> {
        let mut best: Option<(f64, IoU)> = None;
        for &threshold in &self.grid {
            let identifier =
                BasicIdentifier::new(threshold, &self.proba_dim, &self.result_dim, self.result_code)
                    .with_truth_codes(self.truth_codes.clone());

            let mut scores = Vec::with_capacity(tiles.len());
            for tile in tiles.iter_mut() {
                if let Some(score) = identifier.identify(tile)? {
                    scores.push(score);
                }
            }
            let pooled = IoU::combine(&scores);
            info!("threshold {threshold:.3}: {pooled}");
            if best.as_ref().is_none_or(|(_, b)| pooled.iou > b.iou) {
                best = Some((threshold, pooled));
            }
        }
        let (threshold, score) = best.unwrap_or((0.5, IoU::new(0, 0, 0)));
        Ok((threshold, score))
    }
}
