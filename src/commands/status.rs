use anyhow::{Result, bail};
use tracing::{info, warn};

use dosepolicy::artifact::{ArtifactManifest, MANIFEST_FILE, verify_files};
use dosepolicy::service::PolicyService;
use dosepolicy::util::read_json;

use crate::cli::{StatusArgs, artifact_dir};

pub fn run(args: StatusArgs) -> Result<()> {
    let artifact_dir = artifact_dir(&args.cache_root, args.artifact_dir);
    let manifest_path = artifact_dir.join(MANIFEST_FILE);

    info!(artifact_dir = %artifact_dir.display(), "status requested");

    if !manifest_path.exists() {
        warn!(path = %manifest_path.display(), "artifact manifest missing");
        return Ok(());
    }

    let manifest: ArtifactManifest = read_json(&manifest_path)?;
    info!(
        artifact_version = %manifest.artifact_version,
        artifact_hash = %manifest.artifact_hash,
        engine_version = %manifest.engine_version,
        preset = %manifest.preset,
        created_at = %manifest.created_at,
        seed = manifest.seed,
        rows = manifest.row_count,
        levels = ?manifest.treatment_levels,
        has_dr = manifest.has_dr,
        source = %manifest.source.as_ref().map(|source| source.path.as_str()).unwrap_or_default(),
        "loaded artifact manifest"
    );

    let checks = verify_files(&artifact_dir, &manifest)?;
    let mut failed = 0_usize;
    for check in &checks {
        if check.ok() {
            info!(file = %check.file, sha256 = %check.expected, "file hash ok");
        } else {
            failed += 1;
            warn!(
                file = %check.file,
                expected = %check.expected,
                actual = %check.actual.as_deref().unwrap_or("missing"),
                "file hash mismatch"
            );
        }
    }

    if failed > 0 {
        bail!(
            "{failed} of {} artifact files failed verification in {}",
            checks.len(),
            artifact_dir.display()
        );
    }

    info!(files = checks.len(), "artifact verified");

    let metadata = PolicyService::new(&artifact_dir).metadata()?;
    info!(
        treatment = %metadata.treatment_name,
        levels = ?metadata.treatment_levels,
        objectives = ?metadata.objectives,
        segmentations = ?metadata.segmentations,
        has_dr = metadata.has_dr,
        "artifact accepts recommendation requests"
    );
    Ok(())
}
