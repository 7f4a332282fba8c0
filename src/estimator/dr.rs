use std::collections::BTreeMap;

use tracing::debug;

use super::{SegmentCurves, sorted_levels};
use crate::config::SegmentationSpec;
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};
use crate::estimate::EstimatePoint;
use crate::features::FeatureMatrix;
use crate::models::{OutcomeModel, PropensityModel};
use crate::segment::{Partitions, partition};

/// Doubly-robust (augmented inverse-propensity) estimator for one outcome.
///
/// For each level `t` and row `i` the pseudo-outcome is
/// `mu_t(x_i) + 1{T_i = t} / p_t(x_i) * (y_i - mu_t(x_i))`, with `p_t`
/// clipped to `[min_propensity, 1]`. The correction is applied per row and
/// only then aggregated per segment.
pub struct DoublyRobust<'a> {
    pub dataset: &'a Dataset,
    pub features: &'a FeatureMatrix,
    pub propensity: &'a dyn PropensityModel,
    pub outcome_model: &'a dyn OutcomeModel,
    pub outcome_column: &'a str,
    pub min_propensity: f64,
}

impl DoublyRobust<'_> {
    /// Pseudo-outcomes per requested level, one value per row.
    pub fn scores(&self, levels: &[i64]) -> EngineResult<BTreeMap<i64, Vec<f64>>> {
        let treatments = self.dataset.treatments()?;
        let observed = self.dataset.numeric(self.outcome_column)?;
        if self.features.row_count() != treatments.len() {
            return Err(EngineError::dataset(format!(
                "feature matrix has {} rows, dataset has {}",
                self.features.row_count(),
                treatments.len()
            )));
        }

        let probabilities = self.propensity.predict_proba(self.features);
        let classes = self.propensity.classes();

        let mut scores = BTreeMap::new();
        for level in sorted_levels(levels) {
            let class_index = classes.iter().position(|class| *class == level).ok_or_else(|| {
                EngineError::UnknownTreatmentClass {
                    level,
                    known: classes.to_vec(),
                }
            })?;

            let forced = vec![level; treatments.len()];
            let mu = self.outcome_model.predict(self.features, &forced);

            let pseudo: Vec<f64> = (0..treatments.len())
                .map(|row| {
                    let propensity = probabilities[row][class_index].clamp(self.min_propensity, 1.0);
                    let indicator = if treatments[row] == level { 1.0 } else { 0.0 };
                    mu[row] + indicator / propensity * (observed[row] - mu[row])
                })
                .collect();

            debug!(
                outcome = self.outcome_column,
                level,
                rows = pseudo.len(),
                "computed doubly-robust scores"
            );
            scores.insert(level, pseudo);
        }

        Ok(scores)
    }

    pub fn dose_response(
        &self,
        segmentations: &[SegmentationSpec],
        segment_by: &str,
        levels: &[i64],
    ) -> EngineResult<SegmentCurves> {
        // Resolve segments first so a bad segmentation never reaches the models.
        let partitions = partition(self.dataset, segmentations, segment_by)?;
        let scores = self.scores(levels)?;
        summarize_scores(&scores, &partitions)
    }
}

/// Aggregates per-row pseudo-outcomes within each segment.
pub fn summarize_scores(
    scores: &BTreeMap<i64, Vec<f64>>,
    partitions: &Partitions,
) -> EngineResult<SegmentCurves> {
    let mut response = SegmentCurves::new();
    for (segment, rows) in partitions {
        let mut per_level = BTreeMap::new();
        for (level, values) in scores {
            let sample: Vec<f64> = rows.iter().map(|row| values[*row]).collect();
            per_level.insert(*level, EstimatePoint::summarize(&sample)?);
        }
        response.insert(segment.clone(), per_level);
    }
    Ok(response)
}
