//! YAML configuration parsing for the pipeline runner.
//!
//! The pipeline document is plain YAML deserialized into
//! [`pipeline_core::Pipeline`]; the visual representation used by the
//! console round-trips the same document through a JSON object.

pub mod convert;
pub mod error;
pub mod pipeline;

pub use convert::{visual_to_yaml, yaml_to_visual};
pub use error::{ConfigError, ConfigResult};
pub use pipeline::{parse_pipeline, to_yaml};
