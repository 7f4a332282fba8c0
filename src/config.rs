//! Engine configuration.
//!
//! One generic engine serves every product variant; a variant is described
//! entirely by an [`EngineConfig`]: the treatment and its ordered level set,
//! the tracked outcomes, the segmentations and the deployed baseline.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Name of the null segmentation covering the whole population.
pub const SEGMENTATION_NONE: &str = "none";
/// Segment key produced by the null segmentation.
pub const SEGMENT_ALL: &str = "all";
pub const DEFAULT_MIN_PROPENSITY: f64 = 0.02;

const IDENTIFIER_PATTERN: &str = r"^[a-z][a-z0-9_]*$";
const ARTIFACT_VERSION_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentSpec {
    pub name: String,
    pub column: String,
    pub levels: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSpec {
    pub name: String,
    pub column: String,
    /// Rates are reported per 10,000 units.
    #[serde(default)]
    pub is_rate: bool,
    #[serde(default = "default_true")]
    pub higher_is_better: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationSpec {
    pub name: String,
    pub column: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub name: String,
    pub treatment_level: i64,
}

impl Baseline {
    /// Snaps the baseline onto the nearest level; ties go to the lower level.
    pub fn snapped(&self, levels: &[i64]) -> Self {
        let mut treatment_level = self.treatment_level;
        if !levels.contains(&treatment_level) {
            let mut sorted = levels.to_vec();
            sorted.sort_unstable();
            if let Some(nearest) = sorted
                .iter()
                .copied()
                .min_by_key(|level| (level - self.treatment_level).abs())
            {
                treatment_level = nearest;
            }
        }

        Self {
            name: self.name.clone(),
            treatment_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub preset: String,
    pub treatment: TreatmentSpec,
    #[serde(default)]
    pub categorical_features: Vec<String>,
    #[serde(default)]
    pub numeric_features: Vec<String>,
    pub outcomes: Vec<OutcomeSpec>,
    pub objectives: Vec<String>,
    #[serde(default)]
    pub segmentations: Vec<SegmentationSpec>,
    pub baseline: Baseline,
    #[serde(default = "default_min_propensity")]
    pub min_propensity: f64,
}

fn default_true() -> bool {
    true
}

fn default_min_propensity() -> f64 {
    DEFAULT_MIN_PROPENSITY
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn outcome(name: &str, column: &str, is_rate: bool, higher_is_better: bool) -> OutcomeSpec {
    OutcomeSpec {
        name: name.to_string(),
        column: column.to_string(),
        is_rate,
        higher_is_better,
    }
}

fn segmentation(name: &str, label: &str) -> SegmentationSpec {
    SegmentationSpec {
        name: name.to_string(),
        column: name.to_string(),
        label: label.to_string(),
    }
}

impl EngineConfig {
    /// On-device guardrail strictness, levels 0..=4.
    pub fn guardrail() -> Self {
        Self {
            preset: "guardrail".to_string(),
            treatment: TreatmentSpec {
                name: "policy_level".to_string(),
                column: "policy_level".to_string(),
                levels: vec![0, 1, 2, 3, 4],
            },
            categorical_features: strings(&[
                "device_tier",
                "prompt_risk",
                "task_domain",
                "region",
                "connectivity",
            ]),
            numeric_features: strings(&[
                "prompt_tokens",
                "battery_pct",
                "thermal_headroom",
                "model_size_b",
            ]),
            outcomes: vec![
                outcome("task_success", "task_success", true, true),
                outcome("safe_value", "safe_value", true, true),
                outcome("safety_incident", "safety_incident", true, false),
                outcome("latency_ms", "latency_ms", false, false),
            ],
            objectives: strings(&["task_success", "safe_value"]),
            segmentations: vec![
                segmentation("device_tier", "Device"),
                segmentation("prompt_risk", "Risk"),
                segmentation("task_domain", "Domain"),
            ],
            baseline: Baseline {
                name: "current_policy".to_string(),
                treatment_level: 2,
            },
            min_propensity: DEFAULT_MIN_PROPENSITY,
        }
    }

    /// Booking discount percentage, levels 0..=20 in steps of 5.
    pub fn discount() -> Self {
        Self {
            preset: "discount".to_string(),
            treatment: TreatmentSpec {
                name: "discount_pct".to_string(),
                column: "discount_pct".to_string(),
                levels: vec![0, 5, 10, 15, 20],
            },
            categorical_features: strings(&[
                "loyalty_tier",
                "device",
                "region",
                "price_sensitivity",
                "trip_type",
            ]),
            numeric_features: strings(&["lead_time", "base_price", "nights", "search_intensity"]),
            outcomes: vec![
                outcome("bookings", "booked", true, true),
                outcome("net_value", "net_value", true, true),
            ],
            objectives: strings(&["bookings", "net_value"]),
            segmentations: vec![
                segmentation("loyalty_tier", "Loyalty"),
                segmentation("price_sensitivity", "Sensitivity"),
                segmentation("device", "Device"),
            ],
            baseline: Baseline {
                name: "current_policy".to_string(),
                treatment_level: 10,
            },
            min_propensity: DEFAULT_MIN_PROPENSITY,
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse engine config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.treatment.levels.is_empty() {
            return Err(EngineError::config("treatment levels must not be empty"));
        }
        let unique: BTreeSet<i64> = self.treatment.levels.iter().copied().collect();
        if unique.len() != self.treatment.levels.len() {
            return Err(EngineError::config(format!(
                "treatment levels contain duplicates: {:?}",
                self.treatment.levels
            )));
        }

        if self.outcomes.is_empty() {
            return Err(EngineError::config("at least one outcome is required"));
        }

        let identifier = Regex::new(IDENTIFIER_PATTERN)
            .map_err(|err| EngineError::config(format!("identifier pattern: {err}")))?;

        let mut names = BTreeSet::new();
        for spec in &self.outcomes {
            check_identifier(&identifier, "outcome", &spec.name)?;
            if !names.insert(spec.name.as_str()) {
                return Err(EngineError::config(format!(
                    "duplicate outcome '{}'",
                    spec.name
                )));
            }
        }

        for objective in &self.objectives {
            if !names.contains(objective.as_str()) {
                return Err(EngineError::config(format!(
                    "objective '{objective}' is not a tracked outcome"
                )));
            }
        }

        let mut segmentation_names = BTreeSet::new();
        for spec in &self.segmentations {
            check_identifier(&identifier, "segmentation", &spec.name)?;
            if spec.name == SEGMENTATION_NONE {
                return Err(EngineError::config(
                    "segmentation name 'none' is reserved for the whole population",
                ));
            }
            if !segmentation_names.insert(spec.name.as_str()) {
                return Err(EngineError::config(format!(
                    "duplicate segmentation '{}'",
                    spec.name
                )));
            }
        }

        if !(self.min_propensity > 0.0 && self.min_propensity <= 1.0) {
            return Err(EngineError::config(format!(
                "min_propensity must be in (0, 1], got {}",
                self.min_propensity
            )));
        }

        Ok(())
    }

    /// Treatment levels in ascending order.
    pub fn levels(&self) -> Vec<i64> {
        let mut levels = self.treatment.levels.clone();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// `none` first, then configured segmentations in declaration order.
    pub fn segmentation_names(&self) -> Vec<String> {
        let mut names = vec![SEGMENTATION_NONE.to_string()];
        names.extend(self.segmentations.iter().map(|spec| spec.name.clone()));
        names
    }

    pub fn feature_columns(&self) -> Vec<String> {
        let mut columns = self.categorical_features.clone();
        columns.extend(self.numeric_features.iter().cloned());
        columns
    }

    pub fn required_columns(&self) -> BTreeSet<String> {
        let mut columns: BTreeSet<String> = self.feature_columns().into_iter().collect();
        columns.insert(self.treatment.column.clone());
        columns.extend(self.outcomes.iter().map(|spec| spec.column.clone()));
        columns.extend(self.segmentations.iter().map(|spec| spec.column.clone()));
        columns
    }
}

/// Artifact versions end up in directory names and run ids.
pub fn validate_artifact_version(version: &str) -> EngineResult<()> {
    let pattern = Regex::new(ARTIFACT_VERSION_PATTERN)
        .map_err(|err| EngineError::config(format!("artifact version pattern: {err}")))?;
    if pattern.is_match(version) {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "artifact version '{version}' must match {ARTIFACT_VERSION_PATTERN}"
        )))
    }
}

fn check_identifier(pattern: &Regex, kind: &str, value: &str) -> EngineResult<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(EngineError::config(format!(
            "{kind} name '{value}' must match {IDENTIFIER_PATTERN}"
        )))
    }
}
