//! Confounded synthetic logs for tests.

use serde_json::{Value, json};

use crate::artifact::{
    ArtifactBundle, ArtifactManifest, BuildOptions, BuiltArtifact, build_artifact,
};
use crate::config::EngineConfig;
use crate::dataset::{Dataset, Record};
use crate::models::DefaultFitter;

pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1_u64 << 53) as f64
    }

    pub fn pick<'a>(&mut self, options: &[&'a str]) -> &'a str {
        options[(self.next_u64() % options.len() as u64) as usize]
    }

    pub fn weighted(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        let mut draw = self.next_f64() * total;
        for (index, weight) in weights.iter().enumerate() {
            if draw < *weight {
                return index;
            }
            draw -= weight;
        }
        weights.len() - 1
    }
}

fn sigmoid(value: f64) -> f64 {
    1.0 / (1.0 + (-value).exp())
}

/// Guardrail logs where riskier prompts are assigned stricter levels and
/// strictness helps risky prompts while over-blocking safe ones.
pub fn guardrail_records(rows: usize, seed: u64) -> Vec<Record> {
    let mut rng = XorShift::new(seed);
    let levels = EngineConfig::guardrail().levels();

    (0..rows)
        .map(|_| {
            let device_tier = rng.pick(&["entry", "mid", "premium"]);
            let prompt_risk = rng.pick(&["low", "medium", "high"]);
            let task_domain = rng.pick(&["assistant", "code", "support"]);
            let region = rng.pick(&["NA", "EU", "APAC"]);
            let connectivity = rng.pick(&["offline", "poor", "good"]);
            let prompt_tokens = 80.0 + 600.0 * rng.next_f64();
            let battery_pct = 8.0 + 92.0 * rng.next_f64();
            let thermal_headroom = 1.0 + 20.0 * rng.next_f64();
            let model_size_b = match device_tier {
                "entry" => 2.0,
                "mid" => 7.0,
                _ => 12.0,
            } + rng.next_f64();

            let risk = match prompt_risk {
                "low" => 0.25,
                "medium" => 0.7,
                _ => 1.3,
            };
            let weights: Vec<f64> = levels
                .iter()
                .map(|level| {
                    let strictness = *level as f64 / 4.0;
                    (1.2 * strictness * (risk - 0.6) - 0.4 * (strictness - 0.5).powi(2)).exp()
                })
                .collect();
            let level = levels[rng.weighted(&weights)];
            let strictness = level as f64;

            let safety_gain = 0.86 * (1.0 - (-strictness / 1.35).exp()) * risk;
            let overblock = 0.48 * (strictness / 4.0).powf(1.35) * (1.12 - risk).clamp(0.18, 1.2);
            let success_prob = sigmoid(-0.4 + safety_gain - overblock).clamp(0.03, 0.985);
            let task_success = u8::from(rng.next_f64() < success_prob);
            let incident_prob = sigmoid(-2.4 + 1.5 * risk - 1.2 * safety_gain).clamp(0.003, 0.78);
            let safety_incident = u8::from(rng.next_f64() < incident_prob);
            let latency_ms =
                56.0 + 0.05 * prompt_tokens + 15.5 * strictness + 4.0 * (rng.next_f64() - 0.5);
            let safe_value = f64::from(task_success) * (1.48 - 0.0022 * latency_ms)
                - f64::from(safety_incident) * (1.34 + 0.21 * risk);

            let value = json!({
                "device_tier": device_tier,
                "prompt_risk": prompt_risk,
                "task_domain": task_domain,
                "region": region,
                "connectivity": connectivity,
                "prompt_tokens": prompt_tokens,
                "battery_pct": battery_pct,
                "thermal_headroom": thermal_headroom,
                "model_size_b": model_size_b,
                "policy_level": level,
                "task_success": task_success,
                "safe_value": safe_value,
                "safety_incident": safety_incident,
                "latency_ms": latency_ms,
            });
            match value {
                Value::Object(map) => map,
                _ => unreachable!("json! object literal"),
            }
        })
        .collect()
}

pub fn guardrail_dataset(rows: usize, seed: u64) -> Dataset {
    let config = EngineConfig::guardrail();
    Dataset::from_records(&config, &guardrail_records(rows, seed)).expect("generated records")
}

pub fn guardrail_artifact(rows: usize, seed: u64, include_dr: bool) -> BuiltArtifact {
    let config = EngineConfig::guardrail();
    let options = BuildOptions {
        seed,
        artifact_version: "test".to_string(),
        include_dr,
    };
    build_artifact(
        &guardrail_dataset(rows, seed),
        &config,
        &DefaultFitter::default(),
        &options,
    )
    .expect("build artifact")
}

/// In-memory bundle equivalent to publishing `built` and loading it back.
pub fn bundle(built: BuiltArtifact) -> ArtifactBundle {
    let manifest = ArtifactManifest {
        manifest_version: 1,
        artifact_version: built.document.artifact_version.clone(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        preset: built.preset.clone(),
        created_at: "2026-10-18T00:00:00Z".to_string(),
        seed: built.seed,
        row_count: built.row_count,
        treatment_levels: built.document.treatment_levels.clone(),
        has_dr: built.has_dr,
        artifact_hash: built.artifact_hash.clone(),
        file_hashes: Default::default(),
        source: None,
    };
    ArtifactBundle::new(manifest, built.document, built.baseline)
}
