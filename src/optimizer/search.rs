//! Constrained multi-objective search over the decision thresholds.
//!
//! Trials sample the eight thresholds uniformly from their configured
//! ranges; each trial is scored with (automation, precision, recall) plus a
//! constraint penalty equal to the sum of shortfalls below the configured
//! minima. Selection keeps the feasible trial maximising automation; when
//! nothing is feasible, it falls back to the trial maximising the metric
//! product.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::application::CancelToken;
use crate::config::Constraints;
use crate::error::{Error, Result};
use crate::validator::{ThresholdRanges, Thresholds};

/// One scored trial.
#[derive(Debug, Clone)]
pub struct Trial {
    pub thresholds: Thresholds,
    pub automation: f64,
    pub precision: f64,
    pub recall: f64,
    pub penalty: f64,
}

impl Trial {
    #[inline]
    pub fn is_feasible(&self) -> bool {
        self.penalty <= 0.0
    }

    fn product(&self) -> f64 {
        self.automation * self.precision * self.recall
    }
}

/// Sum of shortfalls below the constraint minima; 0 means feasible.
pub fn constraint_penalty(
    automation: f64,
    precision: f64,
    recall: f64,
    constraints: &Constraints,
) -> f64 {
    let mut penalty = 0.0;
    if precision < constraints.min_precision {
        penalty += constraints.min_precision - precision;
    }
    if recall < constraints.min_recall {
        penalty += constraints.min_recall - recall;
    }
    if automation < constraints.min_automation {
        penalty += constraints.min_automation - automation;
    }
    penalty
}

/// Outcome of a study: the selected trial and whether it met every
/// constraint.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: Trial,
    pub feasible: bool,
}

/// The threshold study itself. The objective maps thresholds to
/// (automation, precision, recall), already NaN-cleaned.
pub struct ThresholdSearch {
    pub ranges: ThresholdRanges,
    pub constraints: Constraints,
    pub n_trials: usize,
    pub seed: u64,
    pub cancel: CancelToken,
}

impl ThresholdSearch {
    pub fn run(
        &self,
        mut objective: impl FnMut(&Thresholds) -> (f64, f64, f64),
    ) -> Result<SearchOutcome> {
        self.ranges.validate()?;
        if self.n_trials == 0 {
            return Err(Error::InvalidConfig("optimization.n_trials must be at least 1".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut trials = Vec::with_capacity(self.n_trials);
        for index in 0..self.n_trials {
            if self.cancel.is_cancelled() {
                info!("cancelled between trials after {index} of {}", self.n_trials);
                break;
            }
            let thresholds = self.ranges.sample(&mut rng);
            let (automation, precision, recall) = objective(&thresholds);
            let penalty = constraint_penalty(automation, precision, recall, &self.constraints);
            debug!(
                "trial {index}: automation={automation:.3} precision={precision:.3} \
                 recall={recall:.3} penalty={penalty:.3}"
            );
            trials.push(Trial { thresholds, automation, precision, recall, penalty });
        }

        if trials.is_empty() {
            return Err(Error::NoFeasibleTrial);
        }
        Ok(select_best(trials))
    }
}

/// Feasible trial with maximum automation, else maximum metric product.
/// Ties keep the earliest trial, so a fixed seed selects deterministically.
fn select_best(trials: Vec<Trial>) -> SearchOutcome {
    debug_assert!(!trials.is_empty(), "select_best needs at least one trial");

    let feasible_best = trials
        .iter()
        .filter(|trial| trial.is_feasible())
        .max_by(|a, b| a.automation.total_cmp(&b.automation));

    if let Some(best) = feasible_best {
        return SearchOutcome { best: best.clone(), feasible: true };
    }

    warn!("{}; falling back to the best metric product", Error::NoFeasibleTrial);
    let best = trials
        .iter()
        .max_by(|a, b| a.product().total_cmp(&b.product()))
        .expect("at least one trial")
        .clone();
    SearchOutcome { best, feasible: false }
}
