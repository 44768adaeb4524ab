//! Decision-quality metrics against a labelled corpus.
//!
//! The confusion matrix is 3×3: rows are ground truth in the order unsure,
//! not-building, building; columns are decisions in the order unsure,
//! refuted, confirmed (both expressed as final classification codes).
//! Precision and recall assume a perfect posterior decision for unsure
//! predictions, and only score the sub-population with a known ground
//! truth.

use std::fmt;

use crate::config::FinalCodes;

/// Metrics of one decision set over a labelled cluster corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionMetrics {
    pub groups_count: usize,
    /// Raw counts; rows = ground truth, columns = decisions.
    pub confusion: [[u64; 3]; 3],

    // Ground-truth composition (fractions of all groups).
    pub group_unsure: f64,
    pub group_no_buildings: f64,
    pub group_building: f64,

    // Decision composition (fractions of all groups).
    pub p_auto: f64,
    pub p_unsure: f64,
    pub p_refute: f64,
    pub p_confirm: f64,

    // Decision accuracies (column-normalised diagonal; NaN when a decision
    // never fires).
    pub a_refute: f64,
    pub a_confirm: f64,

    // Quality on the non-ambiguous sub-population (NaN when undefined).
    pub precision: f64,
    pub recall: f64,
}

/// Row (for targets) or column (for decisions) of a final code.
fn axis_index(code: u8, codes: &FinalCodes) -> Option<usize> {
    if code == codes.unsure {
        Some(0)
    } else if code == codes.not_building {
        Some(1)
    } else if code == codes.building {
        Some(2)
    } else {
        None
    }
}

/// Score decisions against ground truth. Both slices hold final codes;
/// pairs with an unrecognised code are ignored.
pub fn evaluate_decisions(targets: &[u8], decisions: &[u8], codes: &FinalCodes) -> DecisionMetrics {
    debug_assert_eq!(targets.len(), decisions.len(), "one decision per target");

    let mut confusion = [[0u64; 3]; 3];
    for (&target, &decision) in targets.iter().zip(decisions) {
        if let (Some(row), Some(column)) = (axis_index(target, codes), axis_index(decision, codes)) {
            confusion[row][column] += 1;
        }
    }

    let total: u64 = confusion.iter().flatten().sum();
    let frac = |count: u64| count as f64 / total as f64;

    let row_sum = |row: usize| confusion[row].iter().sum::<u64>();
    let column_sum = |column: usize| (0..3).map(|row| confusion[row][column]).sum::<u64>();

    let p_unsure = frac(column_sum(0));
    let p_refute = frac(column_sum(1));
    let p_confirm = frac(column_sum(2));

    // Quality, ignoring groups with an ambiguous ground truth:
    // precision = (Yu + Yc) / (Yu + Yc + Nc), recall = (Yu + Yc) / ΣY.
    let true_positives = (confusion[2][0] + confusion[2][2]) as f64;
    let false_positives = confusion[1][2] as f64;
    let precision = true_positives / (true_positives + false_positives);
    let recall = true_positives / row_sum(2) as f64;

    DecisionMetrics {
        groups_count: targets.len(),
        confusion,
        group_unsure: frac(row_sum(0)),
        group_no_buildings: frac(row_sum(1)),
        group_building: frac(row_sum(2)),
        p_auto: p_refute + p_confirm,
        p_unsure,
        p_refute,
        p_confirm,
        a_refute: confusion[1][1] as f64 / column_sum(1) as f64,
        a_confirm: confusion[2][2] as f64 / column_sum(2) as f64,
        precision,
        recall,
    }
}

impl DecisionMetrics {
    /// The three searched metrics with NaN mapped to 0, in the order
    /// automation, precision, recall.
    pub fn key_metrics(&self) -> (f64, f64, f64) {
        let clean = |v: f64| if v.is_nan() { 0.0 } else { v };
        (clean(self.p_auto), clean(self.precision), clean(self.recall))
    }

    /// Row-normalised confusion matrix (fractions per ground-truth class).
    pub fn confusion_normalized(&self) -> [[f64; 3]; 3] {
        let mut normalized = [[0.0; 3]; 3];
        for row in 0..3 {
            let sum: u64 = self.confusion[row].iter().sum();
            if sum > 0 {
                for column in 0..3 {
                    normalized[row][column] = self.confusion[row][column] as f64 / sum as f64;
                }
            }
        }
        normalized
    }
}

impl fmt::Display for DecisionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "groups_count={}", self.groups_count)?;
        writeln!(f, "group_unsure={:.3}", self.group_unsure)?;
        writeln!(f, "group_no_buildings={:.3}", self.group_no_buildings)?;
        writeln!(f, "group_building={:.3}", self.group_building)?;
        writeln!(f, "p_auto={:.3}", self.p_auto)?;
        writeln!(f, "p_unsure={:.3}", self.p_unsure)?;
        writeln!(f, "p_refute={:.3}", self.p_refute)?;
        writeln!(f, "p_confirm={:.3}", self.p_confirm)?;
        writeln!(f, "a_refute={:.3}", self.a_refute)?;
        writeln!(f, "a_confirm={:.3}", self.a_confirm)?;
        writeln!(f, "precision={:.3}", self.precision)?;
        writeln!(f, "recall={:.3}", self.recall)?;
        writeln!(f, "Confusion matrix (rows: truth U/N/Y, columns: decision u/r/c)")?;
        for row in &self.confusion {
            writeln!(f, "  {:>6} {:>6} {:>6}", row[0], row[1], row[2])?;
        }
        writeln!(f, "Confusion matrix (normalized by truth)")?;
        for row in &self.confusion_normalized() {
            writeln!(f, "  {:>6.3} {:>6.3} {:>6.3}", row[0], row[1], row[2])?;
        }
        Ok(())
    }
}
