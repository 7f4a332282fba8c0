use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Two-sided 95% normal quantile.
pub const Z_95: f64 = 1.96;

/// Point estimate with a 95% confidence interval for one
/// (segment, treatment level, outcome) triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatePoint {
    pub mean: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub n: usize,
    /// Set when a sparse segment borrowed the population-wide sample.
    #[serde(default, skip_serializing_if = "is_false")]
    pub from_population: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl EstimatePoint {
    pub fn summarize(values: &[f64]) -> EngineResult<Self> {
        let n = values.len();
        if n == 0 {
            return Err(EngineError::EmptySample);
        }

        let mean = values.iter().sum::<f64>() / n as f64;
        if n == 1 {
            return Ok(Self {
                mean,
                ci_low: mean,
                ci_high: mean,
                n,
                from_population: false,
            });
        }

        let variance = values
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        let standard_error = variance.sqrt() / (n as f64).sqrt();
        let margin = Z_95 * standard_error;

        Ok(Self {
            mean,
            ci_low: mean - margin,
            ci_high: mean + margin,
            n,
            from_population: false,
        })
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            mean: self.mean * factor,
            ci_low: self.ci_low * factor,
            ci_high: self.ci_high * factor,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_sample_is_rejected() {
        assert_eq!(EstimatePoint::summarize(&[]), Err(EngineError::EmptySample));
    }

    #[test]
    fn single_value_collapses_interval() {
        let point = EstimatePoint::summarize(&[0.42]).expect("one value");
        assert_eq!(point.mean, 0.42);
        assert_eq!(point.ci_low, 0.42);
        assert_eq!(point.ci_high, 0.42);
        assert_eq!(point.n, 1);
    }

    #[test]
    fn interval_uses_bessel_corrected_standard_error() {
        let point = EstimatePoint::summarize(&[1.0, 2.0, 3.0, 4.0]).expect("four values");
        let std = (5.0_f64 / 3.0).sqrt();
        let margin = 1.96 * std / 2.0;
        assert!((point.mean - 2.5).abs() < 1e-12);
        assert!((point.ci_low - (2.5 - margin)).abs() < 1e-12);
        assert!((point.ci_high - (2.5 + margin)).abs() < 1e-12);
    }

    #[test]
    fn population_marker_is_omitted_when_unset() {
        let point = EstimatePoint::summarize(&[1.0, 0.0]).expect("two values");
        let raw = serde_json::to_string(&point).expect("serialize");
        assert!(!raw.contains("from_population"));

        let decoded: EstimatePoint = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(decoded, point);
    }

    proptest! {
        #[test]
        fn interval_brackets_mean(values in prop::collection::vec(-1.0e6_f64..1.0e6, 1..64)) {
            let point = EstimatePoint::summarize(&values).expect("non-empty");
            prop_assert!(point.ci_low <= point.mean);
            prop_assert!(point.mean <= point.ci_high);
            prop_assert_eq!(point.n, values.len());
            if values.len() == 1 {
                prop_assert_eq!(point.ci_low, point.mean);
                prop_assert_eq!(point.ci_high, point.mean);
            }
        }
    }
}
