//! Splits a dataset into disjoint, exhaustive segments.

use std::collections::BTreeMap;

use crate::config::{SEGMENT_ALL, SEGMENTATION_NONE, SegmentationSpec};
use crate::dataset::Dataset;
use crate::error::{EngineError, EngineResult};

/// Segment key to row indices, iterated in lexicographic key order.
pub type Partitions = BTreeMap<String, Vec<usize>>;

pub fn partition(
    dataset: &Dataset,
    segmentations: &[SegmentationSpec],
    segment_by: &str,
) -> EngineResult<Partitions> {
    if segment_by == SEGMENTATION_NONE {
        let mut partitions = Partitions::new();
        partitions.insert(SEGMENT_ALL.to_string(), (0..dataset.row_count()).collect());
        return Ok(partitions);
    }

    let spec = segmentations
        .iter()
        .find(|spec| spec.name == segment_by)
        .ok_or_else(|| EngineError::InvalidSegmentation {
            segmentation: segment_by.to_string(),
            known: std::iter::once(SEGMENTATION_NONE.to_string())
                .chain(segmentations.iter().map(|spec| spec.name.clone()))
                .collect(),
        })?;

    let column = dataset.column(&spec.column).ok_or_else(|| {
        EngineError::dataset(format!(
            "segmentation '{}' needs missing column '{}'",
            spec.name, spec.column
        ))
    })?;

    if let Some(row) = column.first_null() {
        return Err(EngineError::NullSegmentValue {
            column: spec.column.clone(),
            row,
        });
    }

    let mut partitions = Partitions::new();
    for row in 0..dataset.row_count() {
        if let Some(key) = column.string_value(row) {
            partitions.entry(key).or_default().push(row);
        }
    }
    Ok(partitions)
}

/// Human-readable segment name for charts and reports.
pub fn segment_label(segmentations: &[SegmentationSpec], segment_by: &str, segment: &str) -> String {
    if segment_by == SEGMENTATION_NONE {
        return "All users".to_string();
    }

    let prefix = segmentations
        .iter()
        .find(|spec| spec.name == segment_by)
        .map(|spec| spec.label.as_str())
        .unwrap_or(segment_by);
    format!("{prefix}={segment}")
}
