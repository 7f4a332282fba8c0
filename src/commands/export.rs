use anyhow::Result;
use tracing::info;

use dosepolicy::artifact::ArtifactBundle;
use dosepolicy::export::build_static_bundle;
use dosepolicy::util::write_json_pretty;

use crate::cli::{ExportArgs, artifact_dir};

pub fn run(args: ExportArgs) -> Result<()> {
    let artifact_dir = artifact_dir(&args.cache_root, args.artifact_dir.clone());
    let output_path = args
        .output_path
        .unwrap_or_else(|| args.cache_root.join("exports").join("recommendations.json"));

    let bundle = ArtifactBundle::load(&artifact_dir)?;
    let exported = build_static_bundle(&bundle)?;
    write_json_pretty(&output_path, &exported)?;

    info!(
        path = %output_path.display(),
        entries = exported.recommendations.len(),
        artifact_hash = %exported.artifact_hash,
        "wrote static recommendations"
    );
    Ok(())
}
