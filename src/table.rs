//! Unified dose-response table and the combiner that builds it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::estimate::EstimatePoint;
use crate::estimator::SegmentCurves;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Naive,
    Dr,
}

impl Method {
    pub const ALL: [Method; 2] = [Method::Naive, Method::Dr];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Dr => "dr",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "naive" => Ok(Self::Naive),
            "dr" => Ok(Self::Dr),
            other => Err(EngineError::UnsupportedMethod {
                method: other.to_string(),
                reason: "expected 'naive' or 'dr'".to_string(),
            }),
        }
    }
}

/// `outcome -> estimate`
pub type OutcomePoints = BTreeMap<String, EstimatePoint>;
/// `level -> outcome -> estimate`
pub type LevelTable = BTreeMap<i64, OutcomePoints>;
/// `segment -> level -> outcome -> estimate`
pub type SegmentTable = BTreeMap<String, LevelTable>;
/// `segmentation -> segment -> level -> outcome -> estimate`
pub type SegmentationTable = BTreeMap<String, SegmentTable>;

/// Estimator outputs before merging: `outcome -> method -> segmentation -> curves`.
pub type EstimatorOutputs = BTreeMap<String, BTreeMap<Method, BTreeMap<String, SegmentCurves>>>;

/// `method -> segmentation -> segment -> level -> outcome -> estimate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoseResponseTable(BTreeMap<Method, SegmentationTable>);

impl DoseResponseTable {
    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.0.keys().copied()
    }

    pub fn method(&self, method: Method) -> Option<&SegmentationTable> {
        self.0.get(&method)
    }

    pub fn segmentation(&self, method: Method, segmentation: &str) -> Option<&SegmentTable> {
        self.0.get(&method)?.get(segmentation)
    }

    /// Checks that every (method, segmentation, segment) has an estimate for
    /// every level and every outcome.
    pub fn ensure_complete(&self, levels: &[i64], outcomes: &[String]) -> EngineResult<()> {
        for (method, segmentations) in &self.0 {
            for (segmentation, segments) in segmentations {
                for (segment, per_level) in segments {
                    for level in levels {
                        let Some(points) = per_level.get(level) else {
                            return Err(EngineError::IncompleteTable {
                                details: format!(
                                    "{method}/{segmentation}/{segment} has no level {level}"
                                ),
                            });
                        };
                        if let Some(missing) =
                            outcomes.iter().find(|outcome| !points.contains_key(*outcome))
                        {
                            return Err(EngineError::IncompleteTable {
                                details: format!(
                                    "{method}/{segmentation}/{segment}/{level} has no outcome '{missing}'"
                                ),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Structural merge of per-outcome estimator outputs. Every input key shows
/// up in the table; outcomes that disagree on segments or levels within one
/// (method, segmentation) are reported instead of silently merged.
pub fn combine(inputs: &EstimatorOutputs) -> EngineResult<DoseResponseTable> {
    let mut table: BTreeMap<Method, SegmentationTable> = BTreeMap::new();
    let mut shapes: BTreeMap<(Method, String), (String, BTreeSet<(String, i64)>)> =
        BTreeMap::new();

    for (outcome, by_method) in inputs {
        for (method, by_segmentation) in by_method {
            for (segmentation, curves) in by_segmentation {
                let shape: BTreeSet<(String, i64)> = curves
                    .iter()
                    .flat_map(|(segment, per_level)| {
                        per_level.keys().map(move |level| (segment.clone(), *level))
                    })
                    .collect();

                match shapes.get(&(*method, segmentation.clone())) {
                    Some((first_outcome, expected)) if *expected != shape => {
                        return Err(EngineError::IncompleteTable {
                            details: format!(
                                "outcome '{outcome}' and '{first_outcome}' cover different segments or levels in {method}/{segmentation}"
                            ),
                        });
                    }
                    Some(_) => {}
                    None => {
                        shapes.insert((*method, segmentation.clone()), (outcome.clone(), shape));
                    }
                }

                let segments = table
                    .entry(*method)
                    .or_default()
                    .entry(segmentation.clone())
                    .or_default();
                for (segment, per_level) in curves {
                    let levels = segments.entry(segment.clone()).or_default();
                    for (level, point) in per_level {
                        levels
                            .entry(*level)
                            .or_default()
                            .insert(outcome.clone(), *point);
                    }
                }
            }
        }
    }

    Ok(DoseResponseTable(table))
}
