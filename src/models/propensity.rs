use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{DefaultFitter, PropensityModel};
use crate::error::{EngineError, EngineResult};
use crate::features::FeatureMatrix;

/// Multinomial logistic regression trained by shuffled mini-batch gradient
/// descent. The shuffle is driven by the build seed, so fits are repeatable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxPropensity {
    classes: Vec<i64>,
    /// One row per class: feature weights followed by the bias.
    weights: Vec<Vec<f64>>,
}

impl SoftmaxPropensity {
    pub fn fit(
        features: &FeatureMatrix,
        treatments: &[i64],
        params: &DefaultFitter,
        seed: u64,
    ) -> EngineResult<Self> {
        if features.row_count() != treatments.len() {
            return Err(EngineError::ModelFit {
                model: "propensity model".to_string(),
                reason: format!(
                    "{} feature rows but {} treatments",
                    features.row_count(),
                    treatments.len()
                ),
            });
        }

        let classes: Vec<i64> = treatments
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if classes.is_empty() {
            return Err(EngineError::ModelFit {
                model: "propensity model".to_string(),
                reason: "no rows to fit".to_string(),
            });
        }

        let width = features.width();
        let mut model = Self {
            weights: vec![vec![0.0; width + 1]; classes.len()],
            classes,
        };
        if model.classes.len() == 1 {
            return Ok(model);
        }

        let targets: Vec<usize> = treatments
            .iter()
            .map(|treatment| model.class_index(*treatment).unwrap_or(0))
            .collect();

        let mut order: Vec<usize> = (0..treatments.len()).collect();
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        let batch_size = params.propensity_batch_size.max(1);

        for epoch in 0..params.propensity_epochs {
            for index in (1..order.len()).rev() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                order.swap(index, (state % (index as u64 + 1)) as usize);
            }

            let learning_rate = params.propensity_learning_rate / (1.0 + 0.1 * epoch as f64);
            for batch in order.chunks(batch_size) {
                let mut gradient = vec![vec![0.0; width + 1]; model.classes.len()];
                for &row in batch {
                    let x = &features.rows()[row];
                    let probabilities = model.row_probabilities(x);
                    for (class, probability) in probabilities.iter().enumerate() {
                        let residual =
                            probability - if class == targets[row] { 1.0 } else { 0.0 };
                        let grad = &mut gradient[class];
                        for (g, value) in grad.iter_mut().zip(x) {
                            *g += residual * value;
                        }
                        grad[width] += residual;
                    }
                }

                let scale = learning_rate / batch.len() as f64;
                for (weights, grad) in model.weights.iter_mut().zip(&gradient) {
                    for (index, (weight, g)) in weights.iter_mut().zip(grad).enumerate() {
                        let penalty = if index < width {
                            params.propensity_l2 * *weight
                        } else {
                            0.0
                        };
                        *weight -= scale * g + learning_rate * penalty;
                    }
                }
            }
        }

        if model.weights.iter().flatten().any(|weight| !weight.is_finite()) {
            return Err(EngineError::ModelFit {
                model: "propensity model".to_string(),
                reason: "gradient descent diverged".to_string(),
            });
        }

        Ok(model)
    }

    fn class_index(&self, treatment: i64) -> Option<usize> {
        self.classes.binary_search(&treatment).ok()
    }

    fn row_probabilities(&self, x: &[f64]) -> Vec<f64> {
        let width = x.len();
        let logits: Vec<f64> = self
            .weights
            .iter()
            .map(|weights| {
                weights[..width]
                    .iter()
                    .zip(x)
                    .map(|(weight, value)| weight * value)
                    .sum::<f64>()
                    + weights[width]
            })
            .collect();

        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|logit| (logit - max).exp()).collect();
        let total: f64 = exps.iter().sum();
        exps.into_iter().map(|value| value / total).collect()
    }
}

impl PropensityModel for SoftmaxPropensity {
    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<Vec<f64>> {
        features
            .rows()
            .iter()
            .map(|row| self.row_probabilities(row))
            .collect()
    }
}
