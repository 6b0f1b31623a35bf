//! YAML ↔ visual (JSON object) conversion for the console.
//!
//! Both directions pass through the typed [`Pipeline`], so a conversion
//! doubles as schema validation.

use pipeline_core::Pipeline;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::pipeline::{parse_pipeline, to_yaml};

/// Convert pipeline YAML into its visual JSON object representation.
pub fn yaml_to_visual(yaml: &str) -> ConfigResult<Value> {
    let pipeline = parse_pipeline(yaml)?;
    Ok(serde_json::to_value(&pipeline)?)
}

/// Convert a visual JSON object back into pipeline YAML.
pub fn visual_to_yaml(visual: &Value) -> ConfigResult<String> {
    let pipeline: Pipeline = serde_json::from_value(visual.clone())
        .map_err(|err| ConfigError::Invalid(format!("invalid visual config: {err}")))?;
    to_yaml(&pipeline)
}
