use super::*;
use crate::config::EngineConfig;
use crate::features::FeatureEncoder;
use crate::testkit;

fn encoded(rows: usize, seed: u64) -> (FeatureMatrix, Vec<i64>, crate::dataset::Dataset) {
    let config = EngineConfig::guardrail();
    let dataset = testkit::guardrail_dataset(rows, seed);
    let encoder = FeatureEncoder::fit(&dataset, &config).expect("encoder");
    let features = encoder.transform(&dataset).expect("features");
    let treatments = dataset.treatments().expect("treatments");
    (features, treatments, dataset)
}

#[test]
fn propensity_rows_are_stochastic_over_observed_classes() {
    let (features, treatments, _) = encoded(600, 11);
    let model = DefaultFitter::default()
        .fit_propensity(&features, &treatments, 17)
        .expect("fit propensity");

    assert_eq!(model.classes(), &[0, 1, 2, 3, 4]);
    for row in model.predict_proba(&features) {
        assert_eq!(row.len(), 5);
        let total: f64 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(row.iter().all(|p| *p > 0.0));
    }
}

#[test]
fn propensity_fit_is_repeatable_for_a_seed() {
    let (features, treatments, _) = encoded(300, 12);
    let fitter = DefaultFitter::default();
    let first = fitter.fit_propensity(&features, &treatments, 5).expect("first");
    let second = fitter.fit_propensity(&features, &treatments, 5).expect("second");
    assert_eq!(first, second);
}

#[test]
fn propensity_learns_confounded_assignment() {
    let (features, treatments, dataset) = encoded(3000, 13);
    let model = DefaultFitter::default()
        .fit_propensity(&features, &treatments, 3)
        .expect("fit propensity");
    let probabilities = model.predict_proba(&features);
    let risk = dataset.column("prompt_risk").expect("prompt_risk");

    let mut strict_high = Vec::new();
    let mut strict_low = Vec::new();
    for (row, p) in probabilities.iter().enumerate() {
        match risk.string_value(row).as_deref() {
            Some("high") => strict_high.push(p[4]),
            Some("low") => strict_low.push(p[4]),
            _ => {}
        }
    }
    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;
    assert!(mean(&strict_high) > mean(&strict_low));
}

#[test]
fn outcome_model_recovers_linear_effect_and_supports_counterfactuals() {
    let (features, treatments, _) = encoded(800, 14);
    let outcome: Vec<f64> = treatments.iter().map(|t| 0.2 + 0.05 * *t as f64).collect();

    let model = DefaultFitter::default()
        .fit_outcome(&features, &treatments, &outcome, 18)
        .expect("fit outcome");

    let fitted = model.predict(&features, &treatments);
    for (predicted, actual) in fitted.iter().zip(&outcome) {
        assert!((predicted - actual).abs() < 1e-3, "{predicted} vs {actual}");
    }

    let forced = vec![3; treatments.len()];
    for predicted in model.predict(&features, &forced) {
        assert!((predicted - 0.35).abs() < 1e-3);
    }
}

#[test]
fn single_class_propensity_is_degenerate_but_valid() {
    let (features, _, _) = encoded(50, 15);
    let treatments = vec![2; 50];
    let model = DefaultFitter::default()
        .fit_propensity(&features, &treatments, 1)
        .expect("fit");
    assert_eq!(model.classes(), &[2]);
    assert!(model.predict_proba(&features).iter().all(|row| row == &vec![1.0]));
}
