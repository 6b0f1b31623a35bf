//! Local pipeline execution.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use pipeline_core::{RunContext, RunOptions};
use tracing::info;

use super::{load_config, resolve_config};

/// Run a pipeline on this machine with the built-in engines.
pub async fn run(
    config: Option<String>,
    workdir: Option<String>,
    allow_env: &[String],
    allow_all_env: bool,
) -> Result<()> {
    let config = resolve_config(config)?;
    let yaml = load_config(&config).await?;
    let mut pipeline = pipeline_config::parse_pipeline(&yaml)
        .with_context(|| format!("failed to parse config {config}"))?;

    if let Some(workdir) = workdir {
        pipeline.set_workdir(workdir);
    }

    let mut environment = HashMap::new();
    for key in allow_env {
        if let Ok(value) = std::env::var(key) {
            environment.insert(key.clone(), value);
        }
    }
    if allow_all_env {
        for (key, value) in std::env::vars() {
            environment.entry(key).or_insert(value);
        }
    }
    pipeline.merge_environment(&environment);

    info!(name = %pipeline.name, config = %config, "running pipeline");

    let executors = Arc::new(pipeline_executor::default_registry());
    pipeline
        .run(&RunContext::new(), RunOptions::new(executors))
        .await?;

    Ok(())
}
