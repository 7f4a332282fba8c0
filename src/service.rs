//! Serving-side facade: artifact and response caches plus the DR to naive
//! fallback policy applied to incoming requests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::ArtifactBundle;
use crate::config::SEGMENTATION_NONE;
use crate::error::{EngineError, EngineResult};
use crate::policy::{Recommendation, recommend};
use crate::table::Method;

pub const DR_UNAVAILABLE_WARNING: &str = "DR artifacts unavailable; falling back to naive policy";
pub const DR_SLICE_WARNING: &str = "DR policy unavailable for this slice; returning naive policy";

/// Holds at most one loaded bundle. Readers clone the `Arc` and never block
/// each other; a reload swaps the reference under a short write lock.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    slot: RwLock<Option<(PathBuf, Arc<ArtifactBundle>)>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached bundle for `artifact_dir`, loading it on first use.
    pub fn get(&self, artifact_dir: &Path) -> Result<Arc<ArtifactBundle>> {
        {
            let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
            if let Some((path, bundle)) = slot.as_ref() {
                if path == artifact_dir {
                    return Ok(Arc::clone(bundle));
                }
            }
        }
        self.reload(artifact_dir)
    }

    pub fn reload(&self, artifact_dir: &Path) -> Result<Arc<ArtifactBundle>> {
        let bundle = Arc::new(ArtifactBundle::load(artifact_dir)?);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((artifact_dir.to_path_buf(), Arc::clone(&bundle)));
        Ok(bundle)
    }

    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub objective: String,
    pub budget_cap: i64,
    pub segmentation: String,
    pub method: Method,
    pub artifact_hash: String,
}

#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<ResponseKey, ServiceResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ResponseKey) -> Option<ServiceResponse> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn set(&self, key: ResponseKey, response: ServiceResponse) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, response);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub objective: String,
    pub budget_cap: i64,
    pub segmentation: String,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub method_used: Method,
    pub recommendation: Recommendation,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// What a client needs to build a valid request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub artifact_version: String,
    pub artifact_hash: String,
    pub treatment_name: String,
    pub treatment_levels: Vec<i64>,
    pub objectives: Vec<String>,
    pub segmentations: Vec<String>,
    pub has_dr: bool,
}

pub struct PolicyService {
    artifact_dir: PathBuf,
    artifacts: ArtifactCache,
    responses: ResponseCache,
}

impl PolicyService {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
            artifacts: ArtifactCache::new(),
            responses: ResponseCache::new(),
        }
    }

    pub fn bundle(&self) -> Result<Arc<ArtifactBundle>> {
        self.artifacts.get(&self.artifact_dir)
    }

    pub fn metadata(&self) -> Result<Metadata> {
        let bundle = self.bundle()?;
        let document = &bundle.document;
        let mut segmentations = vec![SEGMENTATION_NONE.to_string()];
        segmentations.extend(document.segmentations.iter().map(|spec| spec.name.clone()));

        Ok(Metadata {
            artifact_version: bundle.manifest.artifact_version.clone(),
            artifact_hash: bundle.artifact_hash().to_string(),
            treatment_name: document.treatment_name.clone(),
            treatment_levels: document.treatment_levels.clone(),
            objectives: document.objectives.clone(),
            segmentations,
            has_dr: bundle.has_dr(),
        })
    }

    pub fn recommend(&self, request: &RecommendRequest) -> Result<ServiceResponse> {
        let bundle = self.bundle()?;
        validate_request(&bundle, request)?;

        let mut method_used = request.method;
        let mut request_warnings = Vec::new();
        if method_used == Method::Dr && !bundle.has_dr() {
            warn!(artifact_hash = %bundle.artifact_hash(), "{DR_UNAVAILABLE_WARNING}");
            method_used = Method::Naive;
            request_warnings.push(DR_UNAVAILABLE_WARNING.to_string());
        }

        let key = ResponseKey {
            objective: request.objective.clone(),
            budget_cap: request.budget_cap,
            segmentation: request.segmentation.clone(),
            method: method_used,
            artifact_hash: bundle.artifact_hash().to_string(),
        };

        let response = match self.responses.get(&key) {
            Some(cached) => {
                debug!(?key, "response cache hit");
                cached
            }
            None => {
                let response = compute(&bundle, request, method_used)?;
                self.responses.set(key, response.clone());
                response
            }
        };

        Ok(with_warnings(response, request_warnings))
    }

    /// Drops both caches; the next call reloads from disk.
    pub fn clear(&self) {
        self.artifacts.clear();
        self.responses.clear();
    }

    pub fn cached_responses(&self) -> usize {
        self.responses.len()
    }
}

fn compute(
    bundle: &ArtifactBundle,
    request: &RecommendRequest,
    method: Method,
) -> Result<ServiceResponse> {
    let run = |method: Method| {
        recommend(
            bundle,
            &request.objective,
            request.budget_cap,
            &request.segmentation,
            method,
        )
    };

    match run(method) {
        Ok(recommendation) => Ok(ServiceResponse {
            method_used: method,
            recommendation,
            warnings: Vec::new(),
        }),
        Err(
            EngineError::UnsupportedMethod { .. }
            | EngineError::UnsupportedSegmentation { .. }
            | EngineError::IncompleteTable { .. },
        ) if method == Method::Dr => {
            warn!(segmentation = %request.segmentation, "{DR_SLICE_WARNING}");
            Ok(ServiceResponse {
                method_used: Method::Naive,
                recommendation: run(Method::Naive)?,
                warnings: vec![DR_SLICE_WARNING.to_string()],
            })
        }
        Err(err) => Err(err.into()),
    }
}

fn with_warnings(mut response: ServiceResponse, warnings: Vec<String>) -> ServiceResponse {
    for warning in warnings {
        if !response.warnings.contains(&warning) {
            response.warnings.push(warning);
        }
    }
    response
}

fn validate_request(bundle: &ArtifactBundle, request: &RecommendRequest) -> EngineResult<()> {
    let document = &bundle.document;
    if !document.objectives.contains(&request.objective) {
        return Err(EngineError::InvalidRequest {
            reason: format!(
                "objective '{}' must be one of {:?}",
                request.objective, document.objectives
            ),
        });
    }
    if !document.treatment_levels.contains(&request.budget_cap) {
        return Err(EngineError::InvalidRequest {
            reason: format!(
                "budget cap {} must match a treatment level: {:?}",
                request.budget_cap, document.treatment_levels
            ),
        });
    }
    Ok(())
}
