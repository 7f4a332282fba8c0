use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{DoseResponseDocument, artifact_hash};
use crate::config::{Baseline, EngineConfig, validate_artifact_version};
use crate::dataset::Dataset;
use crate::estimator::{DoublyRobust, estimate_naive_dose_response, summarize_scores};
use crate::features::FeatureEncoder;
use crate::models::ModelFitter;
use crate::segment::{Partitions, partition};
use crate::table::{EstimatorOutputs, Method, combine};

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub seed: u64,
    pub artifact_version: String,
    /// When false only the naive estimator runs and no models are fitted.
    pub include_dr: bool,
}

/// A fully computed artifact, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct BuiltArtifact {
    pub preset: String,
    pub seed: u64,
    pub row_count: usize,
    pub has_dr: bool,
    pub artifact_hash: String,
    pub document: DoseResponseDocument,
    pub baseline: Baseline,
    pub encoder: FeatureEncoder,
    pub propensity_model: Option<Value>,
    pub outcome_models: Option<BTreeMap<String, Value>>,
}

pub fn build_artifact<F: ModelFitter>(
    dataset: &Dataset,
    config: &EngineConfig,
    fitter: &F,
    options: &BuildOptions,
) -> Result<BuiltArtifact> {
    config.validate()?;
    validate_artifact_version(&options.artifact_version)?;
    dataset.validate(config).context("dataset failed validation")?;

    let levels = config.levels();
    let row_count = dataset.row_count();
    let baseline = config.baseline.snapped(&levels);
    if baseline.treatment_level != config.baseline.treatment_level {
        warn!(
            configured = config.baseline.treatment_level,
            snapped = baseline.treatment_level,
            "baseline level is not in the level set; snapped to nearest"
        );
    }

    info!(
        preset = %config.preset,
        rows = row_count,
        levels = ?levels,
        seed = options.seed,
        include_dr = options.include_dr,
        "building dose-response artifact"
    );

    let segment_bys = config.segmentation_names();
    let mut partitions: BTreeMap<String, Partitions> = BTreeMap::new();
    for segment_by in &segment_bys {
        let segments = partition(dataset, &config.segmentations, segment_by)?;
        debug!(segmentation = %segment_by, segments = segments.len(), "partitioned dataset");
        partitions.insert(segment_by.clone(), segments);
    }

    let mut outputs = EstimatorOutputs::new();
    for outcome in &config.outcomes {
        let by_segmentation = outputs
            .entry(outcome.name.clone())
            .or_default()
            .entry(Method::Naive)
            .or_default();
        for segment_by in &segment_bys {
            let curves = estimate_naive_dose_response(
                dataset,
                &outcome.column,
                &config.segmentations,
                segment_by,
                &levels,
            )?;
            by_segmentation.insert(segment_by.clone(), curves);
        }
    }

    let encoder = FeatureEncoder::fit(dataset, config)?;

    let (propensity_model, outcome_models) = if options.include_dr {
        let features = encoder.transform(dataset)?;
        let treatments = dataset.treatments()?;

        let propensity = fitter.fit_propensity(&features, &treatments, options.seed)?;
        info!(width = features.width(), "fitted propensity model");

        let mut outcome_models = BTreeMap::new();
        for (index, outcome) in config.outcomes.iter().enumerate() {
            let observed = dataset.numeric(&outcome.column)?;
            let outcome_seed = options.seed.wrapping_add(index as u64 + 1);
            let model = fitter.fit_outcome(&features, &treatments, &observed, outcome_seed)?;

            let estimator = DoublyRobust {
                dataset,
                features: &features,
                propensity: &propensity,
                outcome_model: &model,
                outcome_column: &outcome.column,
                min_propensity: config.min_propensity,
            };
            let scores = estimator.scores(&levels)?;

            let by_segmentation = outputs
                .entry(outcome.name.clone())
                .or_default()
                .entry(Method::Dr)
                .or_default();
            for (segment_by, segments) in &partitions {
                by_segmentation.insert(segment_by.clone(), summarize_scores(&scores, segments)?);
            }

            info!(outcome = %outcome.name, seed = outcome_seed, "fitted outcome model");
            outcome_models.insert(
                outcome.name.clone(),
                serde_json::to_value(&model)
                    .with_context(|| format!("failed to encode outcome model '{}'", outcome.name))?,
            );
        }

        let propensity =
            serde_json::to_value(&propensity).context("failed to encode propensity model")?;
        (Some(propensity), Some(outcome_models))
    } else {
        info!("skipping doubly-robust estimation");
        (None, None)
    };

    let table = combine(&outputs)?;
    let outcome_names: Vec<String> = config.outcomes.iter().map(|spec| spec.name.clone()).collect();
    table.ensure_complete(&levels, &outcome_names)?;

    let artifact_hash = artifact_hash(options.seed, row_count, &levels, &table)?;
    info!(artifact_hash = %artifact_hash, "computed artifact hash");

    let document = DoseResponseDocument {
        artifact_version: options.artifact_version.clone(),
        treatment_name: config.treatment.name.clone(),
        treatment_levels: levels,
        baseline: baseline.clone(),
        outcomes: config.outcomes.clone(),
        objectives: config.objectives.clone(),
        segmentations: config.segmentations.clone(),
        dose_response: table,
    };

    Ok(BuiltArtifact {
        preset: config.preset.clone(),
        seed: options.seed,
        row_count,
        has_dr: options.include_dr,
        artifact_hash,
        document,
        baseline,
        encoder,
        propensity_model,
        outcome_models,
    })
}
