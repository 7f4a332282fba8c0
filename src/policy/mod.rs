//! Budget-capped policy recommendation over a loaded artifact.
//!
//! Pure and read-only: the same bundle and request always produce the same
//! [`Recommendation`], so callers may cache freely.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactBundle;
use crate::config::{Baseline, OutcomeSpec};
use crate::error::{EngineError, EngineResult};
use crate::estimate::EstimatePoint;
use crate::segment::segment_label;
use crate::table::{LevelTable, Method, OutcomePoints};


/// Rate outcomes are reported per this many units.
pub const RATE_SCALE: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaledEstimate {
    pub mean: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaVsBaseline {
    pub outcomes: BTreeMap<String, f64>,
    pub treatment_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecommendation {
    pub segment: String,
    pub label: String,
    pub recommended_level: i64,
    pub expected: BTreeMap<String, f64>,
    pub delta_vs_baseline: DeltaVsBaseline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub treatment_level: i64,
    pub outcomes: BTreeMap<String, ScaledEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCurve {
    pub segment: String,
    pub label: String,
    pub points: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub artifact_version: String,
    pub treatment_name: String,
    pub objective: String,
    pub budget_cap: i64,
    pub segmentation: String,
    pub method: Method,
    pub segments: Vec<SegmentRecommendation>,
    pub dose_response: Vec<SegmentCurve>,
    pub baseline: Baseline,
}

/// Picks, per segment, the level at or under `budget_cap` that optimizes
/// `objective`. Ties go to the lowest level.
///
/// The objective is maximized, or minimized when its outcome is configured
/// with `higher_is_better = false`.
pub fn recommend(
    bundle: &ArtifactBundle,
    objective: &str,
    budget_cap: i64,
    segmentation: &str,
    method: Method,
) -> EngineResult<Recommendation> {
    let document = &bundle.document;

    if method == Method::Dr && !bundle.has_dr() {
        return Err(EngineError::UnsupportedMethod {
            method: method.to_string(),
            reason: "artifact was built without doubly-robust estimates".to_string(),
        });
    }
    let by_segmentation =
        document
            .dose_response
            .method(method)
            .ok_or_else(|| EngineError::UnsupportedMethod {
                method: method.to_string(),
                reason: "method is missing from the artifact".to_string(),
            })?;
    let segments = by_segmentation.get(segmentation).ok_or_else(|| {
        EngineError::UnsupportedSegmentation {
            segmentation: segmentation.to_string(),
        }
    })?;

    let objective_spec = document
        .outcomes
        .iter()
        .find(|spec| spec.name == objective)
        .ok_or_else(|| EngineError::UnknownOutcome {
            outcome: objective.to_string(),
            known: document.outcomes.iter().map(|spec| spec.name.clone()).collect(),
        })?;

    let levels = &document.treatment_levels;
    let candidates: Vec<i64> = levels.iter().copied().filter(|level| *level <= budget_cap).collect();
    if candidates.is_empty() {
        return Err(EngineError::NoFeasibleLevel {
            budget_cap,
            levels: levels.clone(),
        });
    }

    let baseline_level = bundle.baseline.treatment_level;
    let mut recommendations = Vec::with_capacity(segments.len());
    let mut curves = Vec::with_capacity(segments.len());

    for (segment, per_level) in segments {
        let context = SegmentContext {
            method,
            segmentation,
            segment,
            per_level,
        };

        let mut best: Option<(i64, f64)> = None;
        for &level in &candidates {
            let score = context.point(level, objective)?.mean;
            let better = match best {
                None => true,
                Some((_, best_score)) if objective_spec.higher_is_better => score > best_score,
                Some((_, best_score)) => score < best_score,
            };
            if better {
                best = Some((level, score));
            }
        }
        let Some((recommended_level, _)) = best else {
            continue;
        };

        let chosen = context.points(recommended_level)?;
        let baseline = context.points(baseline_level)?;

        let mut expected = BTreeMap::new();
        let mut deltas = BTreeMap::new();
        for spec in &document.outcomes {
            let chosen_mean = context.lookup(chosen, recommended_level, &spec.name)?.mean;
            let baseline_mean = context.lookup(baseline, baseline_level, &spec.name)?.mean;
            expected.insert(spec.name.clone(), round2(chosen_mean * scale(spec)));
            deltas.insert(
                spec.name.clone(),
                round2((chosen_mean - baseline_mean) * scale(spec)),
            );
        }

        let label = segment_label(&document.segmentations, segmentation, segment);
        recommendations.push(SegmentRecommendation {
            segment: segment.clone(),
            label: label.clone(),
            recommended_level,
            expected,
            delta_vs_baseline: DeltaVsBaseline {
                outcomes: deltas,
                treatment_level: recommended_level - baseline_level,
            },
        });

        let mut points = Vec::with_capacity(levels.len());
        for &level in levels {
            let at_level = context.points(level)?;
            let mut outcomes = BTreeMap::new();
            for spec in &document.outcomes {
                let point = context.lookup(at_level, level, &spec.name)?;
                outcomes.insert(spec.name.clone(), scaled_estimate(point, spec));
            }
            points.push(CurvePoint {
                treatment_level: level,
                outcomes,
            });
        }
        curves.push(SegmentCurve {
            segment: segment.clone(),
            label,
            points,
        });
    }

    Ok(Recommendation {
        artifact_version: document.artifact_version.clone(),
        treatment_name: document.treatment_name.clone(),
        objective: objective.to_string(),
        budget_cap,
        segmentation: segmentation.to_string(),
        method,
        segments: recommendations,
        dose_response: curves,
        baseline: bundle.baseline.clone(),
    })
}

struct SegmentContext<'a> {
    method: Method,
    segmentation: &'a str,
    segment: &'a str,
    per_level: &'a LevelTable,
}

impl<'a> SegmentContext<'a> {
    fn points(&self, level: i64) -> EngineResult<&'a OutcomePoints> {
        self.per_level
            .get(&level)
            .ok_or_else(|| self.incomplete(format!("no level {level}")))
    }

    fn lookup<'p>(
        &self,
        points: &'p OutcomePoints,
        level: i64,
        outcome: &str,
    ) -> EngineResult<&'p EstimatePoint> {
        points
            .get(outcome)
            .ok_or_else(|| self.incomplete(format!("level {level} has no outcome '{outcome}'")))
    }

    fn point(&self, level: i64, outcome: &str) -> EngineResult<&'a EstimatePoint> {
        let points = self.points(level)?;
        self.lookup(points, level, outcome)
    }

    fn incomplete(&self, what: String) -> EngineError {
        EngineError::IncompleteTable {
            details: format!(
                "{}/{}/{}: {what}",
                self.method, self.segmentation, self.segment
            ),
        }
    }
}

fn scale(spec: &OutcomeSpec) -> f64 {
    if spec.is_rate { RATE_SCALE } else { 1.0 }
}

fn scaled_estimate(point: &EstimatePoint, spec: &OutcomeSpec) -> ScaledEstimate {
    let scaled = point.scaled(scale(spec));
    ScaledEstimate {
        mean: round2(scaled.mean),
        ci_low: round2(scaled.ci_low),
        ci_high: round2(scaled.ci_high),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
