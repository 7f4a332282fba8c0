//! Versioned, content-hashed artifact bundles.
//!
//! A bundle directory holds:
//! - `dose_response.json`: the [`DoseResponseDocument`]
//! - `policy_baselines.json`: the pinned [`Baseline`]
//! - `feature_encoder.json`, `propensity_model.json`, `outcome_models.json`:
//!   fitted models, owned by the build and never read by the recommender
//! - `manifest.json`: the [`ArtifactManifest`]

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Baseline, OutcomeSpec, SegmentationSpec};
use crate::table::DoseResponseTable;
use crate::util::{read_json, sha256_bytes, sha256_file};

mod build;
mod manifest;
mod store;
#[cfg(test)]
mod tests;

pub use build::{BuildOptions, BuiltArtifact, build_artifact};
pub use manifest::{ArtifactManifest, SourceInfo, artifact_hash};
pub use store::publish;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOSE_RESPONSE_FILE: &str = "dose_response.json";
pub const BASELINE_FILE: &str = "policy_baselines.json";
pub const FEATURE_ENCODER_FILE: &str = "feature_encoder.json";
pub const PROPENSITY_MODEL_FILE: &str = "propensity_model.json";
pub const OUTCOME_MODELS_FILE: &str = "outcome_models.json";

/// Everything the recommender needs, self-describing so it can be consumed
/// without the engine configuration that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseResponseDocument {
    pub artifact_version: String,
    pub treatment_name: String,
    pub treatment_levels: Vec<i64>,
    pub baseline: Baseline,
    pub outcomes: Vec<OutcomeSpec>,
    pub objectives: Vec<String>,
    pub segmentations: Vec<SegmentationSpec>,
    pub dose_response: DoseResponseTable,
}

/// A loaded artifact. Immutable; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub manifest: ArtifactManifest,
    pub document: DoseResponseDocument,
    /// Baseline already snapped onto the artifact's level set.
    pub baseline: Baseline,
}

impl ArtifactBundle {
    pub fn new(manifest: ArtifactManifest, document: DoseResponseDocument, baseline: Baseline) -> Self {
        let baseline = baseline.snapped(&document.treatment_levels);
        Self {
            manifest,
            document,
            baseline,
        }
    }

    /// Loads a published bundle and checks every file it reads against the
    /// manifest. A read that overlaps a publish can see a missing directory
    /// or files from two bundles; that read fails the check and is retried
    /// once.
    pub fn load(artifact_dir: &Path) -> Result<Self> {
        match Self::read_consistent(artifact_dir) {
            Ok(bundle) => Ok(bundle),
            Err(err) => {
                warn!(path = %artifact_dir.display(), error = %err, "artifact read failed; retrying");
                Self::read_consistent(artifact_dir)
            }
        }
    }

    fn read_consistent(artifact_dir: &Path) -> Result<Self> {
        let manifest_path = artifact_dir.join(MANIFEST_FILE);
        let dose_response_path = artifact_dir.join(DOSE_RESPONSE_FILE);
        if !manifest_path.exists() || !dose_response_path.exists() {
            bail!(
                "missing artifacts in {}; run `dosepolicy build` first",
                artifact_dir.display()
            );
        }

        let manifest: ArtifactManifest = read_json(&manifest_path)?;
        let document: DoseResponseDocument = read_listed(artifact_dir, DOSE_RESPONSE_FILE, &manifest)?;

        let recomputed = artifact_hash(
            manifest.seed,
            manifest.row_count,
            &document.treatment_levels,
            &document.dose_response,
        )?;
        if recomputed != manifest.artifact_hash {
            bail!(
                "{DOSE_RESPONSE_FILE} in {} does not match its manifest (hash {recomputed}, manifest {})",
                artifact_dir.display(),
                manifest.artifact_hash
            );
        }

        let baseline_path = artifact_dir.join(BASELINE_FILE);
        let baseline = if baseline_path.exists() {
            read_listed(artifact_dir, BASELINE_FILE, &manifest)?
        } else {
            warn!(path = %baseline_path.display(), "baseline file missing; using document baseline");
            document.baseline.clone()
        };

        info!(
            path = %artifact_dir.display(),
            artifact_version = %manifest.artifact_version,
            artifact_hash = %manifest.artifact_hash,
            has_dr = manifest.has_dr,
            "loaded artifact"
        );

        Ok(Self::new(manifest, document, baseline))
    }

    pub fn has_dr(&self) -> bool {
        self.manifest.has_dr
    }

    pub fn artifact_hash(&self) -> &str {
        &self.manifest.artifact_hash
    }
}

/// Parses `file` from the bytes whose hash was checked against the manifest.
fn read_listed<T: DeserializeOwned>(
    artifact_dir: &Path,
    file: &str,
    manifest: &ArtifactManifest,
) -> Result<T> {
    let path = artifact_dir.join(file);
    let raw = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    if let Some(expected) = manifest.file_hashes.get(file) {
        let actual = sha256_bytes(&raw);
        if &actual != expected {
            bail!(
                "{} does not match its manifest hash (expected {expected}, found {actual})",
                path.display()
            );
        }
    }
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileCheck {
    pub file: String,
    pub expected: String,
    pub actual: Option<String>,
}

impl FileCheck {
    pub fn ok(&self) -> bool {
        self.actual.as_deref() == Some(self.expected.as_str())
    }
}

/// Re-hashes every file listed in the manifest.
pub fn verify_files(artifact_dir: &Path, manifest: &ArtifactManifest) -> Result<Vec<FileCheck>> {
    let mut checks = Vec::with_capacity(manifest.file_hashes.len());
    for (file, expected) in &manifest.file_hashes {
        let path = artifact_dir.join(file);
        let actual = if path.exists() {
            Some(sha256_file(&path).with_context(|| format!("failed to verify {file}"))?)
        } else {
            None
        };
        checks.push(FileCheck {
            file: file.clone(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(checks)
}
