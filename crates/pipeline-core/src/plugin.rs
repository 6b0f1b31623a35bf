//! Step plugins.
//!
//! A plugin replaces the user command with an entrypoint inside a
//! designated image, parameterized by a settings map that is exported as
//! `PIPELINE_PLUGIN_SETTINGS_<KEY>` environment variables.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Default entrypoint invoked inside the plugin image.
pub const DEFAULT_ENTRYPOINT: &str = "/pipeline/plugin/run";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugin {
    /// Plugin image, e.g. "docker.io/library/alpine:latest".
    pub image: String,

    /// Settings, exported as PIPELINE_PLUGIN_SETTINGS_<UPPER(key)>=value.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, String>,

    /// Entrypoint inside the image, default "/pipeline/plugin/run".
    #[serde(skip_serializing_if = "String::is_empty")]
    pub entrypoint: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_password: String,

    /// Start the rebuilt environment from the step's inherited environment
    /// instead of an empty map. Set for language-synthesized plugins.
    #[serde(skip)]
    pub inherit_env: bool,
}

/// Shell command that exits 127 when the entrypoint is missing, then
/// invokes it.
pub(crate) fn guard_command(entrypoint: &str) -> String {
    format!(
        "if [ ! -f {entrypoint} ]; then\n  echo \"plugin entrypoint not found: {entrypoint}\"\n  exit 127\nfi\n{entrypoint}"
    )
}

/// PIPELINE_PLUGIN_SETTINGS_<UPPER(key)>.
pub(crate) fn settings_key(key: &str) -> String {
    format!("PIPELINE_PLUGIN_SETTINGS_{}", key.to_uppercase())
}

/// Resolve a setting value: `${KEY}` is substituted from the inherited
/// environment when KEY is present, otherwise the literal is kept.
pub(crate) fn resolve_setting(value: &str, inherited: &HashMap<String, String>) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"^\$\{([A-Za-z_][A-Za-z0-9_]*)\}$").expect("valid pattern"));

    if let Some(captures) = pattern.captures(value) {
        if let Some(resolved) = inherited.get(&captures[1]) {
            return resolved.clone();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_exits_127_when_entrypoint_missing() {
        let command = guard_command(DEFAULT_ENTRYPOINT);
        assert!(command.contains("exit 127"));
        assert!(command.ends_with(DEFAULT_ENTRYPOINT));
    }

    #[test]
    fn settings_keys_are_uppercased() {
        assert_eq!(settings_key("api_token"), "PIPELINE_PLUGIN_SETTINGS_API_TOKEN");
    }

    #[test]
    fn setting_reference_resolves_from_inherited_env() {
        let inherited = HashMap::from([("TOKEN".to_string(), "s3cret".to_string())]);
        assert_eq!(resolve_setting("${TOKEN}", &inherited), "s3cret");
        assert_eq!(resolve_setting("${MISSING}", &inherited), "${MISSING}");
        assert_eq!(resolve_setting("literal", &inherited), "literal");
        // Embedded references are not expanded, only whole-value ones.
        assert_eq!(resolve_setting("x${TOKEN}", &inherited), "x${TOKEN}");
    }
}
