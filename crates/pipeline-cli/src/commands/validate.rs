//! Pipeline config validation.

use anyhow::{Context, Result};

/// Parse a config file and check the shape a run would reject.
pub fn validate(config: &str) -> Result<()> {
    let yaml = std::fs::read_to_string(config)
        .with_context(|| format!("failed to read config {config}"))?;
    let pipeline = pipeline_config::parse_pipeline(&yaml)
        .with_context(|| format!("failed to parse config {config}"))?;

    if pipeline.name.is_empty() {
        anyhow::bail!("pipeline name is required");
    }
    if pipeline.stages.is_empty() {
        anyhow::bail!("at least one stage is required");
    }

    let jobs: usize = pipeline.stages.iter().map(|s| s.jobs.len()).sum();
    let steps: usize = pipeline
        .stages
        .iter()
        .flat_map(|s| &s.jobs)
        .map(|j| j.steps.len())
        .sum();
    println!(
        "{}: ok ({} stages, {jobs} jobs, {steps} steps)",
        pipeline.name,
        pipeline.stages.len()
    );

    Ok(())
}
