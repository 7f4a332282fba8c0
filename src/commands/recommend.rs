use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use dosepolicy::service::{PolicyService, RecommendRequest, ServiceResponse};

use crate::cli::{RecommendArgs, artifact_dir};

pub fn run(args: RecommendArgs) -> Result<()> {
    let service = PolicyService::new(artifact_dir(&args.cache_root, args.artifact_dir.clone()));
    let request = RecommendRequest {
        objective: args.objective.clone(),
        budget_cap: args.budget_cap,
        segmentation: args.segment_by.clone(),
        method: args.method.into(),
    };

    let response = service.recommend(&request)?;
    info!(
        objective = %request.objective,
        budget_cap = request.budget_cap,
        segmentation = %request.segmentation,
        requested_method = %request.method,
        method_used = %response.method_used,
        segments = response.recommendation.segments.len(),
        "recommendation completed"
    );

    if args.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize recommendation json output")?;
        writeln!(output)?;
        output.flush()?;
    } else {
        write_text_response(&response)?;
    }
    Ok(())
}

fn write_text_response(response: &ServiceResponse) -> Result<()> {
    let recommendation = &response.recommendation;
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Artifact: {} method={} objective={} {} <= {}",
        recommendation.artifact_version,
        response.method_used,
        recommendation.objective,
        recommendation.treatment_name,
        recommendation.budget_cap
    )?;
    writeln!(
        output,
        "Baseline: {} at {}",
        recommendation.baseline.name, recommendation.baseline.treatment_level
    )?;
    for warning in &response.warnings {
        writeln!(output, "Warning: {warning}")?;
    }

    for segment in &recommendation.segments {
        writeln!(
            output,
            "{}\tlevel={}\t(delta {:+})",
            segment.label, segment.recommended_level, segment.delta_vs_baseline.treatment_level
        )?;
        for (outcome, expected) in &segment.expected {
            let delta = segment
                .delta_vs_baseline
                .outcomes
                .get(outcome)
                .copied()
                .unwrap_or_default();
            writeln!(output, "\t{outcome}={expected:.2}\t(delta {delta:+.2})")?;
        }
    }

    output.flush()?;
    Ok(())
}
