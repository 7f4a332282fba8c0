use anyhow::Result;
use chrono::Utc;
use tracing::info;

use dosepolicy::artifact::{BuildOptions, SourceInfo, build_artifact, publish};
use dosepolicy::config::EngineConfig;
use dosepolicy::dataset::Dataset;
use dosepolicy::models::DefaultFitter;
use dosepolicy::util::sha256_file;

use crate::cli::{BuildArgs, artifact_dir};

pub fn run(args: BuildArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => args.preset.config(),
    };
    let artifact_dir = artifact_dir(&args.cache_root, args.artifact_dir.clone());
    let artifact_version = args
        .artifact_version
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    info!(
        data_path = %args.data_path.display(),
        preset = %config.preset,
        artifact_dir = %artifact_dir.display(),
        "build requested"
    );

    let dataset = Dataset::load_jsonl(&args.data_path, &config)?;
    let source = SourceInfo {
        path: args.data_path.display().to_string(),
        sha256: sha256_file(&args.data_path)?,
    };

    let options = BuildOptions {
        seed: args.seed,
        artifact_version,
        include_dr: !args.skip_dr,
    };
    let built = build_artifact(&dataset, &config, &DefaultFitter::default(), &options)?;
    let manifest = publish(&artifact_dir, &built, Some(source))?;

    info!(
        artifact_version = %manifest.artifact_version,
        artifact_hash = %manifest.artifact_hash,
        rows = manifest.row_count,
        has_dr = manifest.has_dr,
        "build completed"
    );
    Ok(())
}
