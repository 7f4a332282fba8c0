use std::fs;

use serde_json::Value;

use super::*;
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::error::EngineError;
use crate::models::DefaultFitter;
use crate::table::Method;
use crate::testkit;
use crate::util::{read_json, write_json_pretty};

fn options(include_dr: bool) -> BuildOptions {
    BuildOptions {
        seed: 42,
        artifact_version: "2026-10-18".to_string(),
        include_dr,
    }
}

fn build(rows: usize, include_dr: bool) -> BuiltArtifact {
    let config = EngineConfig::guardrail();
    let dataset = testkit::guardrail_dataset(rows, 7);
    build_artifact(&dataset, &config, &DefaultFitter::default(), &options(include_dr))
        .expect("build artifact")
}

#[test]
fn artifact_hash_is_reproducible() {
    let first = build(400, true);
    let second = build(400, true);
    assert_eq!(first.artifact_hash, second.artifact_hash);
    assert_eq!(first.document, second.document);
    assert_eq!(first.artifact_hash.len(), 64);

    let mut reseeded = options(true);
    reseeded.seed = 43;
    let config = EngineConfig::guardrail();
    let dataset = testkit::guardrail_dataset(400, 7);
    let third = build_artifact(&dataset, &config, &DefaultFitter::default(), &reseeded)
        .expect("reseeded build");
    assert_ne!(first.artifact_hash, third.artifact_hash);
}

#[test]
fn table_covers_every_method_segmentation_level_and_outcome() {
    let built = build(400, true);
    let table = &built.document.dose_response;
    assert_eq!(table.methods().collect::<Vec<_>>(), vec![Method::Naive, Method::Dr]);

    for method in Method::ALL {
        for segmentation in ["none", "device_tier", "prompt_risk", "task_domain"] {
            let segments = table
                .segmentation(method, segmentation)
                .unwrap_or_else(|| panic!("missing {method}/{segmentation}"));
            for per_level in segments.values() {
                assert_eq!(per_level.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
                for points in per_level.values() {
                    assert_eq!(points.len(), 4);
                }
            }
        }
    }

    assert_eq!(
        built
            .outcome_models
            .as_ref()
            .map(|models| models.keys().cloned().collect::<Vec<_>>()),
        Some(vec![
            "latency_ms".to_string(),
            "safe_value".to_string(),
            "safety_incident".to_string(),
            "task_success".to_string(),
        ])
    );
}

#[test]
fn naive_only_build_has_no_models_or_dr_slice() {
    let built = build(300, false);
    assert!(!built.has_dr);
    assert!(built.propensity_model.is_none());
    assert!(built.outcome_models.is_none());
    assert!(built.document.dose_response.method(Method::Dr).is_none());

    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    let manifest = publish(&artifact_dir, &built, None).expect("publish");
    assert!(!manifest.has_dr);
    assert!(!artifact_dir.join(PROPENSITY_MODEL_FILE).exists());
    assert!(!artifact_dir.join(OUTCOME_MODELS_FILE).exists());
    assert!(artifact_dir.join(FEATURE_ENCODER_FILE).exists());
}

#[test]
fn publish_writes_hashed_files_and_loads_back() {
    let built = build(400, true);
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    let source = SourceInfo {
        path: "logs.jsonl".to_string(),
        sha256: "0".repeat(64),
    };

    let manifest = publish(&artifact_dir, &built, Some(source.clone())).expect("publish");
    assert_eq!(manifest.artifact_hash, built.artifact_hash);
    assert_eq!(manifest.source, Some(source));
    assert_eq!(
        manifest.file_hashes.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![
            DOSE_RESPONSE_FILE,
            FEATURE_ENCODER_FILE,
            OUTCOME_MODELS_FILE,
            BASELINE_FILE,
            PROPENSITY_MODEL_FILE,
        ]
    );

    let checks = verify_files(&artifact_dir, &manifest).expect("verify");
    assert!(checks.iter().all(FileCheck::ok));

    let bundle = ArtifactBundle::load(&artifact_dir).expect("load");
    assert!(bundle.has_dr());
    assert_eq!(bundle.artifact_hash(), built.artifact_hash);
    assert_eq!(bundle.document, built.document);
    assert_eq!(bundle.baseline.treatment_level, 2);

    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .expect("list parent")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name())
        .filter(|name| name != "artifacts")
        .collect();
    assert!(leftovers.is_empty(), "staging dirs left behind: {leftovers:?}");
}

#[test]
fn republish_replaces_bundle_and_tampering_is_detected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    publish(&artifact_dir, &build(300, true), None).expect("first publish");
    let manifest = publish(&artifact_dir, &build(300, false), None).expect("second publish");

    assert!(!artifact_dir.join(PROPENSITY_MODEL_FILE).exists());
    let bundle = ArtifactBundle::load(&artifact_dir).expect("load");
    assert!(!bundle.has_dr());

    fs::write(artifact_dir.join(BASELINE_FILE), b"{}").expect("tamper");
    let checks = verify_files(&artifact_dir, &manifest).expect("verify");
    let failed: Vec<&str> = checks
        .iter()
        .filter(|check| !check.ok())
        .map(|check| check.file.as_str())
        .collect();
    assert_eq!(failed, vec![BASELINE_FILE]);
}

#[test]
fn invalid_dataset_fails_before_anything_is_written() {
    let config = EngineConfig::guardrail();
    let mut records = testkit::guardrail_records(200, 9);
    records[5].insert("prompt_risk".to_string(), Value::Null);
    let dataset = Dataset::from_records(&config, &records).expect("column store");

    let err = build_artifact(&dataset, &config, &DefaultFitter::default(), &options(true))
        .expect_err("null segment");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::NullSegmentValue { column, row: 5 }) if column == "prompt_risk"
    ));
}

#[test]
fn missing_baseline_file_falls_back_to_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    publish(&artifact_dir, &build(300, false), None).expect("publish");
    fs::remove_file(artifact_dir.join(BASELINE_FILE)).expect("remove baseline");

    let bundle = ArtifactBundle::load(&artifact_dir).expect("load");
    assert_eq!(bundle.baseline.name, "current_policy");
    assert_eq!(bundle.baseline.treatment_level, 2);
}

#[test]
fn loading_an_empty_dir_points_at_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ArtifactBundle::load(dir.path()).expect_err("empty");
    assert!(err.to_string().contains("dosepolicy build"));
}

#[test]
fn off_grid_baseline_is_snapped_at_build_time() {
    let mut config = EngineConfig::guardrail();
    config.baseline.treatment_level = 9;
    let dataset = testkit::guardrail_dataset(300, 7);
    let built = build_artifact(&dataset, &config, &DefaultFitter::default(), &options(false))
        .expect("build");
    assert_eq!(built.baseline.treatment_level, 4);
    assert_eq!(built.document.baseline.treatment_level, 4);
}

#[test]
fn unsafe_artifact_version_is_rejected() {
    let config = EngineConfig::guardrail();
    let dataset = testkit::guardrail_dataset(50, 7);
    let mut unsafe_version = options(false);
    unsafe_version.artifact_version = "../latest".to_string();
    let err = build_artifact(&dataset, &config, &DefaultFitter::default(), &unsafe_version)
        .expect_err("path traversal");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidConfig { .. })
    ));
}

#[test]
fn loaded_bundle_rehashes_to_manifest_hash() {
    let built = build(400, true);
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    let manifest = publish(&artifact_dir, &built, None).expect("publish");

    let bundle = ArtifactBundle::load(&artifact_dir).expect("load");
    let rehashed = artifact_hash(
        bundle.manifest.seed,
        bundle.manifest.row_count,
        &bundle.document.treatment_levels,
        &bundle.document.dose_response,
    )
    .expect("rehash");
    assert_eq!(rehashed, manifest.artifact_hash);
    assert_eq!(bundle.document.dose_response, built.document.dose_response);
}

#[test]
fn non_finite_outcome_never_replaces_published_bundle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    let manifest = publish(&artifact_dir, &build(300, false), None).expect("publish");

    let config = EngineConfig::guardrail();
    let mut records = testkit::guardrail_records(200, 9);
    records[5].insert("latency_ms".to_string(), Value::String("NaN".to_string()));
    let data_path = dir.path().join("logs.jsonl");
    let body: String = records
        .iter()
        .map(|record| serde_json::to_string(record).expect("record json") + "\n")
        .collect();
    fs::write(&data_path, body).expect("write logs");

    let err = Dataset::load_jsonl(&data_path, &config).expect_err("NaN outcome");
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DatasetValidation { reason }) if reason.contains("'latency_ms'")
    ));

    let bundle = ArtifactBundle::load(&artifact_dir).expect("previous bundle intact");
    assert_eq!(bundle.artifact_hash(), manifest.artifact_hash);
}

#[test]
fn load_rejects_document_from_another_bundle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let artifact_dir = dir.path().join("artifacts");
    publish(&artifact_dir, &build(300, false), None).expect("publish");

    let config = EngineConfig::guardrail();
    let dataset = testkit::guardrail_dataset(300, 8);
    let other = build_artifact(&dataset, &config, &DefaultFitter::default(), &options(false))
        .expect("other build");
    write_json_pretty(&artifact_dir.join(DOSE_RESPONSE_FILE), &other.document)
        .expect("swap document");

    let err = ArtifactBundle::load(&artifact_dir).expect_err("file hash mismatch");
    assert!(err.to_string().contains("does not match"), "{err:#}");

    // Without a listed file hash the table hash still ties document to manifest.
    let manifest_path = artifact_dir.join(MANIFEST_FILE);
    let mut manifest: ArtifactManifest = read_json(&manifest_path).expect("manifest");
    manifest.file_hashes.remove(DOSE_RESPONSE_FILE);
    write_json_pretty(&manifest_path, &manifest).expect("rewrite manifest");

    let err = ArtifactBundle::load(&artifact_dir).expect_err("table hash mismatch");
    assert!(err.to_string().contains("does not match its manifest"), "{err:#}");
}

#[test]
fn run_ids_are_unique_within_a_process() {
    let first = super::store::next_run_id();
    let second = super::store::next_run_id();
    assert_ne!(first, second);
    assert!(first.contains(&std::process::id().to_string()));
}
