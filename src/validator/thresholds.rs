//! Decision thresholds for cluster-level building validation, and the
//! sampling ranges the optimiser draws trials from.

use std::fs;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The eight thresholds governing a cluster-level decision. All are
/// fractions in [0, 1]; see the decision tree in the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Thresholds {
    /// A point confirms when its building probability reaches this.
    pub min_confidence_confirmation: f64,
    /// Fraction of confirming points required to confirm the cluster.
    pub min_frac_confirmation: f64,
    /// Relaxation factor applied to the confirmation confidence for points
    /// under a database polygon.
    pub min_frac_confirmation_factor_if_bd_uni_overlay: f64,
    /// Fraction of overlaid points above which the database vouches for the
    /// cluster.
    pub min_uni_db_overlay_frac: f64,
    /// A point refutes when its non-building probability reaches this.
    pub min_confidence_refutation: f64,
    /// Fraction of refuting points required to refute the cluster.
    pub min_frac_refutation: f64,
    /// A point is uncertain when its entropy reaches this.
    pub min_entropy_uncertainty: f64,
    /// Fraction of uncertain points above which the cluster is unsure.
    pub min_frac_entropy_uncertain: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_confidence_confirmation: 0.5,
            min_frac_confirmation: 0.5,
            min_frac_confirmation_factor_if_bd_uni_overlay: 1.0,
            min_uni_db_overlay_frac: 0.5,
            min_confidence_refutation: 0.5,
            min_frac_refutation: 0.5,
            min_entropy_uncertainty: 0.5,
            min_frac_entropy_uncertain: 0.5,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in self.fields() {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "building_validation.thresholds.{field} = {value} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    fn fields(&self) -> [(&'static str, f64); 8] {
        [
            ("min_confidence_confirmation", self.min_confidence_confirmation),
            ("min_frac_confirmation", self.min_frac_confirmation),
            (
                "min_frac_confirmation_factor_if_bd_uni_overlay",
                self.min_frac_confirmation_factor_if_bd_uni_overlay,
            ),
            ("min_uni_db_overlay_frac", self.min_uni_db_overlay_frac),
            ("min_confidence_refutation", self.min_confidence_refutation),
            ("min_frac_refutation", self.min_frac_refutation),
            ("min_entropy_uncertainty", self.min_entropy_uncertainty),
            ("min_frac_entropy_uncertain", self.min_frac_entropy_uncertain),
        ]
    }

    /// Load a persisted threshold record.
    pub fn load(path: &Path) -> Result<Thresholds> {
        let data = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let thresholds: Thresholds =
            serde_json::from_str(&data).map_err(|e| Error::io(path, e))?;
        thresholds.validate()?;
        Ok(thresholds)
    }

    /// Persist the record as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self).map_err(|e| Error::io(path, e))?;
        fs::write(path, data).map_err(|e| Error::io(path, e))
    }
}

/// Inclusive sampling range for one threshold.
pub type Range = (f64, f64);

/// Per-threshold sampling ranges for the optimiser. The defaults restrict
/// the overlay, relaxation and entropy thresholds to the upper half of the
/// unit interval, where every useful solution lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdRanges {
    pub min_confidence_confirmation: Range,
    pub min_frac_confirmation: Range,
    pub min_frac_confirmation_factor_if_bd_uni_overlay: Range,
    pub min_uni_db_overlay_frac: Range,
    pub min_confidence_refutation: Range,
    pub min_frac_refutation: Range,
    pub min_entropy_uncertainty: Range,
    pub min_frac_entropy_uncertain: Range,
}

impl Default for ThresholdRanges {
    fn default() -> Self {
        Self {
            min_confidence_confirmation: (0.0, 1.0),
            min_frac_confirmation: (0.0, 1.0),
            min_frac_confirmation_factor_if_bd_uni_overlay: (0.5, 1.0),
            min_uni_db_overlay_frac: (0.5, 1.0),
            min_confidence_refutation: (0.0, 1.0),
            min_frac_refutation: (0.0, 1.0),
            min_entropy_uncertainty: (0.5, 1.0),
            min_frac_entropy_uncertain: (0.33, 1.0),
        }
    }
}

impl ThresholdRanges {
    pub fn validate(&self) -> Result<()> {
        for (field, (lo, hi)) in self.fields() {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "optimization.ranges.{field} = ({lo}, {hi}) is not a sub-range of [0, 1]"
                )));
            }
        }
        Ok(())
    }

    fn fields(&self) -> [(&'static str, Range); 8] {
        [
            ("min_confidence_confirmation", self.min_confidence_confirmation),
            ("min_frac_confirmation", self.min_frac_confirmation),
            (
                "min_frac_confirmation_factor_if_bd_uni_overlay",
                self.min_frac_confirmation_factor_if_bd_uni_overlay,
            ),
            ("min_uni_db_overlay_frac", self.min_uni_db_overlay_frac),
            ("min_confidence_refutation", self.min_confidence_refutation),
            ("min_frac_refutation", self.min_frac_refutation),
            ("min_entropy_uncertainty", self.min_entropy_uncertainty),
            ("min_frac_entropy_uncertain", self.min_frac_entropy_uncertain),
        ]
    }

    /// Draw one uniform sample per threshold.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Thresholds {
        fn draw<R: Rng>(rng: &mut R, (lo, hi): Range) -> f64 {
            if lo == hi {
                lo
            } else {
                rng.random_range(lo..=hi)
            }
        }
        Thresholds {
            min_confidence_confirmation: draw(rng, self.min_confidence_confirmation),
            min_frac_confirmation: draw(rng, self.min_frac_confirmation),
            min_frac_confirmation_factor_if_bd_uni_overlay: draw(
                rng,
                self.min_frac_confirmation_factor_if_bd_uni_overlay,
            ),
            min_uni_db_overlay_frac: draw(rng, self.min_uni_db_overlay_frac),
            min_confidence_refutation: draw(rng, self.min_confidence_refutation),
            min_frac_refutation: draw(rng, self.min_frac_refutation),
            min_entropy_uncertainty: draw(rng, self.min_entropy_uncertainty),
            min_frac_entropy_uncertain: draw(rng, self.min_frac_entropy_uncertain),
        }
    }
}
