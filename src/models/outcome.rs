use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::OutcomeModel;
use super::linalg::solve_spd;
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureMatrix;

/// Intercepts are penalized this little so the system stays positive definite.
const INTERCEPT_RIDGE: f64 = 1e-8;

/// Ridge regression over `[level one-hot, features, scaled level * features]`.
///
/// The level one-hot acts as a per-level intercept and the interaction block
/// lets feature effects drift with treatment intensity. Forcing a different
/// level at prediction time yields the counterfactual estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RidgeOutcome {
    levels: Vec<i64>,
    coefficients: Vec<f64>,
}

impl RidgeOutcome {
    pub fn fit(
        features: &FeatureMatrix,
        treatments: &[i64],
        outcome: &[f64],
        ridge: f64,
    ) -> EngineResult<Self> {
        if features.row_count() != treatments.len() || treatments.len() != outcome.len() {
            return Err(EngineError::ModelFit {
                model: "outcome model".to_string(),
                reason: format!(
                    "row mismatch: {} features, {} treatments, {} outcomes",
                    features.row_count(),
                    treatments.len(),
                    outcome.len()
                ),
            });
        }

        let levels: Vec<i64> = treatments
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if levels.is_empty() {
            return Err(EngineError::ModelFit {
                model: "outcome model".to_string(),
                reason: "no rows to fit".to_string(),
            });
        }

        let mut model = Self {
            levels,
            coefficients: Vec::new(),
        };
        let size = model.design_width(features.width());

        let mut gram = vec![vec![0.0; size]; size];
        let mut moment = vec![0.0; size];
        for ((x, treatment), y) in features.rows().iter().zip(treatments).zip(outcome) {
            let phi = model.design_row(x, *treatment);
            for i in 0..size {
                if phi[i] == 0.0 {
                    continue;
                }
                moment[i] += phi[i] * y;
                for j in 0..=i {
                    gram[i][j] += phi[i] * phi[j];
                }
            }
        }

        let intercepts = model.levels.len();
        for i in 0..size {
            for j in 0..i {
                gram[j][i] = gram[i][j];
            }
            gram[i][i] += if i < intercepts { INTERCEPT_RIDGE } else { ridge };
        }

        model.coefficients = solve_spd(gram, &moment).map_err(|err| EngineError::ModelFit {
            model: "outcome model".to_string(),
            reason: err.to_string(),
        })?;
        Ok(model)
    }

    fn design_width(&self, feature_width: usize) -> usize {
        self.levels.len() + 2 * feature_width
    }

    fn scaled_level(&self, treatment: i64) -> f64 {
        let (Some(first), Some(last)) = (self.levels.first(), self.levels.last()) else {
            return 0.0;
        };
        if last == first {
            0.0
        } else {
            (treatment - first) as f64 / (last - first) as f64
        }
    }

    fn design_row(&self, x: &[f64], treatment: i64) -> Vec<f64> {
        let mut phi = Vec::with_capacity(self.design_width(x.len()));
        phi.extend(
            self.levels
                .iter()
                .map(|level| if *level == treatment { 1.0 } else { 0.0 }),
        );
        phi.extend_from_slice(x);
        let z = self.scaled_level(treatment);
        phi.extend(x.iter().map(|value| z * value));
        phi
    }
}

impl OutcomeModel for RidgeOutcome {
    fn predict(&self, features: &FeatureMatrix, treatments: &[i64]) -> Vec<f64> {
        features
            .rows()
            .iter()
            .zip(treatments)
            .map(|(x, treatment)| {
                self.design_row(x, *treatment)
                    .iter()
                    .zip(&self.coefficients)
                    .map(|(phi, beta)| phi * beta)
                    .sum()
            })
            .collect()
    }
}
