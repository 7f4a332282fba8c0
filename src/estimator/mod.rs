//! Per-segment dose-response estimators.

use std::collections::BTreeMap;

use crate::estimate::EstimatePoint;

mod dr;
mod naive;

pub use dr::{DoublyRobust, summarize_scores};
pub use naive::estimate_naive_dose_response;

/// `segment -> treatment level -> estimate` for a single outcome.
pub type SegmentCurves = BTreeMap<String, BTreeMap<i64, EstimatePoint>>;

fn sorted_levels(levels: &[i64]) -> Vec<i64> {
    let mut sorted = levels.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}
