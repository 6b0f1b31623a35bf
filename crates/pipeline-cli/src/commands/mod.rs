//! CLI commands.

mod client;
mod run;
mod validate;

pub use client::client;
pub use run::run;
pub use validate::validate;

use anyhow::{Context, Result};

/// Resolve the config argument: an explicit path/URL, or the first
/// well-known config file present in the current directory.
pub(crate) fn resolve_config(config: Option<String>) -> Result<String> {
    if let Some(config) = config {
        return Ok(config);
    }
    for candidate in [".pipeline.yaml", ".pipeline/pipeline.yaml"] {
        if std::path::Path::new(candidate).exists() {
            return Ok(candidate.to_string());
        }
    }
    anyhow::bail!("config is required (no .pipeline.yaml found)")
}

/// Load the config body from a local file or an http(s) URL.
pub(crate) async fn load_config(config: &str) -> Result<String> {
    if config.starts_with("http://") || config.starts_with("https://") {
        let response = reqwest::get(config)
            .await
            .with_context(|| format!("failed to fetch config from {config}"))?
            .error_for_status()
            .with_context(|| format!("failed to fetch config from {config}"))?;
        response.text().await.context("failed to read config body")
    } else {
        std::fs::read_to_string(config).with_context(|| format!("failed to read config {config}"))
    }
}
