use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::manifest::MANIFEST_VERSION;
use super::{
    ArtifactManifest, BASELINE_FILE, BuiltArtifact, DOSE_RESPONSE_FILE, FEATURE_ENCODER_FILE,
    MANIFEST_FILE, OUTCOME_MODELS_FILE, PROPENSITY_MODEL_FILE, SourceInfo,
};
use crate::util::{ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

static PUBLISH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Writes `built` into `artifact_dir`, replacing any previous bundle there.
///
/// Files go to a hidden staging sibling first. The old bundle is then moved
/// aside and the staging dir renamed into place, so for a moment
/// `artifact_dir` does not exist. [`super::ArtifactBundle::load`] checks what
/// it reads against the manifest and retries a read that overlapped a swap.
pub fn publish(
    artifact_dir: &Path,
    built: &BuiltArtifact,
    source: Option<SourceInfo>,
) -> Result<ArtifactManifest> {
    let name = artifact_dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("artifact dir has no usable name: {}", artifact_dir.display()))?;
    let parent = match artifact_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_directory(&parent)?;

    let run_id = next_run_id();
    let staging = parent.join(format!(".{name}.staging-{run_id}"));
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("failed to clear {}", staging.display()))?;
    }

    let manifest = match write_bundle(&staging, built, source) {
        Ok(manifest) => manifest,
        Err(err) => {
            discard(&staging);
            return Err(err);
        }
    };

    let previous = parent.join(format!(".{name}.previous-{run_id}"));
    let had_previous = artifact_dir.exists();
    if had_previous {
        if let Err(err) = fs::rename(artifact_dir, &previous) {
            discard(&staging);
            return Err(err).with_context(|| {
                format!("failed to move aside {}", artifact_dir.display())
            });
        }
    }

    if let Err(err) = fs::rename(&staging, artifact_dir) {
        if had_previous && fs::rename(&previous, artifact_dir).is_err() {
            warn!(previous = %previous.display(), "could not restore previous artifact");
        }
        discard(&staging);
        return Err(err)
            .with_context(|| format!("failed to publish {}", artifact_dir.display()));
    }

    if had_previous {
        discard(&previous);
    }

    info!(
        path = %artifact_dir.display(),
        artifact_version = %manifest.artifact_version,
        artifact_hash = %manifest.artifact_hash,
        files = manifest.file_hashes.len(),
        "published artifact"
    );
    Ok(manifest)
}

/// Unique per publish call, including calls from one process within the
/// same second.
pub(super) fn next_run_id() -> String {
    format!(
        "{}-{}-{}",
        utc_compact_string(Utc::now()),
        std::process::id(),
        PUBLISH_SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}

fn write_bundle(
    dir: &Path,
    built: &BuiltArtifact,
    source: Option<SourceInfo>,
) -> Result<ArtifactManifest> {
    ensure_directory(dir)?;

    let mut file_hashes = BTreeMap::new();
    write_file(dir, DOSE_RESPONSE_FILE, &built.document, &mut file_hashes)?;
    write_file(dir, BASELINE_FILE, &built.baseline, &mut file_hashes)?;
    write_file(dir, FEATURE_ENCODER_FILE, &built.encoder, &mut file_hashes)?;
    if let Some(model) = &built.propensity_model {
        write_file(dir, PROPENSITY_MODEL_FILE, model, &mut file_hashes)?;
    }
    if let Some(models) = &built.outcome_models {
        write_file(dir, OUTCOME_MODELS_FILE, models, &mut file_hashes)?;
    }

    let manifest = ArtifactManifest {
        manifest_version: MANIFEST_VERSION,
        artifact_version: built.document.artifact_version.clone(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        preset: built.preset.clone(),
        created_at: now_utc_string(),
        seed: built.seed,
        row_count: built.row_count,
        treatment_levels: built.document.treatment_levels.clone(),
        has_dr: built.has_dr,
        artifact_hash: built.artifact_hash.clone(),
        file_hashes,
        source,
    };
    write_json_pretty(&dir.join(MANIFEST_FILE), &manifest)?;
    Ok(manifest)
}

fn write_file<T: Serialize>(
    dir: &Path,
    file: &str,
    value: &T,
    file_hashes: &mut BTreeMap<String, String>,
) -> Result<()> {
    let path = dir.join(file);
    write_json_pretty(&path, value)?;
    file_hashes.insert(file.to_string(), sha256_file(&path)?);
    Ok(())
}

fn discard(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!(path = %dir.display(), error = %err, "failed to remove temporary artifact dir");
    }
}
