use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::table::DoseResponseTable;
use crate::util::canonical_json_sha256;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub manifest_version: u32,
    pub artifact_version: String,
    pub engine_version: String,
    pub preset: String,
    pub created_at: String,
    pub seed: u64,
    pub row_count: usize,
    pub treatment_levels: Vec<i64>,
    pub has_dr: bool,
    /// Content hash over seed, row count, levels and the table only.
    pub artifact_hash: String,
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInfo>,
}

#[derive(Serialize)]
struct HashPayload<'a> {
    seed: u64,
    row_count: usize,
    treatment_levels: &'a [i64],
    dose_response: &'a DoseResponseTable,
}

/// Reproducible content hash used downstream as the artifact cache key.
pub fn artifact_hash(
    seed: u64,
    row_count: usize,
    treatment_levels: &[i64],
    dose_response: &DoseResponseTable,
) -> Result<String> {
    canonical_json_sha256(&HashPayload {
        seed,
        row_count,
        treatment_levels,
        dose_response,
    })
}
