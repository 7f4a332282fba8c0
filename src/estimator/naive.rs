use std::collections::BTreeMap;

use super::{SegmentCurves, sorted_levels};
use crate::config::SegmentationSpec;
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};
use crate::estimate::EstimatePoint;
use crate::segment::partition;

/// Stratified observed means. A segment with no rows at a level borrows the
/// population-wide observations for that level and is marked
/// `from_population`.
pub fn estimate_naive_dose_response(
    dataset: &Dataset,
    outcome_column: &str,
    segmentations: &[SegmentationSpec],
    segment_by: &str,
    levels: &[i64],
) -> EngineResult<SegmentCurves> {
    let partitions = partition(dataset, segmentations, segment_by)?;
    let treatments = dataset.treatments()?;
    let observed = dataset.numeric(outcome_column)?;
    let levels = sorted_levels(levels);

    let mut population: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for (treatment, value) in treatments.iter().zip(&observed) {
        population.entry(*treatment).or_default().push(*value);
    }

    let mut response = SegmentCurves::new();
    for (segment, rows) in partitions {
        let mut per_level = BTreeMap::new();
        for &level in &levels {
            let in_segment: Vec<f64> = rows
                .iter()
                .filter(|row| treatments[**row] == level)
                .map(|row| observed[*row])
                .collect();

            let point = if in_segment.is_empty() {
                let fallback = population
                    .get(&level)
                    .filter(|values| !values.is_empty())
                    .ok_or_else(|| EngineError::NoObservations {
                        outcome: outcome_column.to_string(),
                        level,
                    })?;
                EstimatePoint {
                    from_population: true,
                    ..EstimatePoint::summarize(fallback)?
                }
            } else {
                EstimatePoint::summarize(&in_segment)?
            };
            per_level.insert(level, point);
        }
        response.insert(segment, per_level);
    }

    Ok(response)
}
