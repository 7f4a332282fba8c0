//! Precomputed recommendations for every request an artifact can answer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::ArtifactBundle;
use crate::config::SEGMENTATION_NONE;
use crate::error::EngineResult;
use crate::policy::{Recommendation, recommend};
use crate::table::Method;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticBundle {
    pub artifact_version: String,
    pub artifact_hash: String,
    pub treatment_levels: Vec<i64>,
    /// Keyed by [`static_key`].
    pub recommendations: BTreeMap<String, Recommendation>,
}

pub fn static_key(objective: &str, budget_cap: i64, segmentation: &str, method: Method) -> String {
    format!("{objective}|{budget_cap}|{segmentation}|{method}")
}

/// Runs the recommender for every objective, budget cap, segmentation and
/// method the artifact holds. DR entries are left out when the artifact has
/// no DR estimates.
pub fn build_static_bundle(bundle: &ArtifactBundle) -> EngineResult<StaticBundle> {
    let document = &bundle.document;
    let methods: Vec<Method> = Method::ALL
        .into_iter()
        .filter(|method| *method == Method::Naive || bundle.has_dr())
        .collect();
    let mut segmentations = vec![SEGMENTATION_NONE.to_string()];
    segmentations.extend(document.segmentations.iter().map(|spec| spec.name.clone()));

    let mut recommendations = BTreeMap::new();
    for objective in &document.objectives {
        for &budget_cap in &document.treatment_levels {
            for segmentation in &segmentations {
                for &method in &methods {
                    let recommendation =
                        recommend(bundle, objective, budget_cap, segmentation, method)?;
                    recommendations.insert(
                        static_key(objective, budget_cap, segmentation, method),
                        recommendation,
                    );
                }
            }
        }
    }

    info!(
        artifact_version = %document.artifact_version,
        entries = recommendations.len(),
        "built static recommendation bundle"
    );

    Ok(StaticBundle {
        artifact_version: document.artifact_version.clone(),
        artifact_hash: bundle.artifact_hash().to_string(),
        treatment_levels: document.treatment_levels.clone(),
        recommendations,
    })
}
