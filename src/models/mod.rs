//! Propensity and outcome model capabilities consumed by the estimators,
//! plus the default fitter used by artifact builds.

use serde::Serialize;

use crate::error::EngineResult;
use crate::features::FeatureMatrix;

mod linalg;
mod outcome;
mod propensity;
#[cfg(test)]
mod tests;

pub use outcome::RidgeOutcome;
pub use propensity::SoftmaxPropensity;

/// Estimates `P(treatment = class | features)`.
pub trait PropensityModel {
    /// Treatment classes seen during fitting, ascending; columns of
    /// [`PropensityModel::predict_proba`] follow this order.
    fn classes(&self) -> &[i64];

    /// One row-stochastic probability vector per feature row.
    fn predict_proba(&self, features: &FeatureMatrix) -> Vec<Vec<f64>>;
}

/// Predicts an outcome from features and a (possibly counterfactual)
/// treatment level per row.
pub trait OutcomeModel {
    fn predict(&self, features: &FeatureMatrix, treatments: &[i64]) -> Vec<f64>;
}

/// Fits the models an artifact build needs. Fitted models are written into
/// the artifact, so they must serialize.
pub trait ModelFitter {
    type Propensity: PropensityModel + Serialize;
    type Outcome: OutcomeModel + Serialize;

    fn fit_propensity(
        &self,
        features: &FeatureMatrix,
        treatments: &[i64],
        seed: u64,
    ) -> EngineResult<Self::Propensity>;

    fn fit_outcome(
        &self,
        features: &FeatureMatrix,
        treatments: &[i64],
        outcome: &[f64],
        seed: u64,
    ) -> EngineResult<Self::Outcome>;
}

/// Multinomial logistic propensity and ridge outcome regression.
#[derive(Debug, Clone)]
pub struct DefaultFitter {
    pub propensity_epochs: usize,
    pub propensity_batch_size: usize,
    pub propensity_learning_rate: f64,
    pub propensity_l2: f64,
    pub outcome_ridge: f64,
}

impl Default for DefaultFitter {
    fn default() -> Self {
        Self {
            propensity_epochs: 30,
            propensity_batch_size: 256,
            propensity_learning_rate: 0.5,
            propensity_l2: 1e-4,
            outcome_ridge: 1.0,
        }
    }
}

impl ModelFitter for DefaultFitter {
    type Propensity = SoftmaxPropensity;
    type Outcome = RidgeOutcome;

    fn fit_propensity(
        &self,
        features: &FeatureMatrix,
        treatments: &[i64],
        seed: u64,
    ) -> EngineResult<Self::Propensity> {
        SoftmaxPropensity::fit(features, treatments, self, seed)
    }

    fn fit_outcome(
        &self,
        features: &FeatureMatrix,
        treatments: &[i64],
        outcome: &[f64],
        _seed: u64,
    ) -> EngineResult<Self::Outcome> {
        RidgeOutcome::fit(features, treatments, outcome, self.outcome_ridge)
    }
}
