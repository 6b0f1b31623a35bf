//! Pipeline document parsing.

use pipeline_core::Pipeline;

#[cfg(test)]
use crate::error::ConfigError;
use crate::error::ConfigResult;

/// Parse a pipeline from YAML text.
///
/// Only decoding and basic shape are checked here; the full validation
/// (name, stages, reserved environment keys) happens when the pipeline is
/// prepared for a run.
pub fn parse_pipeline(yaml: &str) -> ConfigResult<Pipeline> {
    let pipeline: Pipeline = serde_yaml::from_str(yaml)?;
    Ok(pipeline)
}

/// Serialize a pipeline back to YAML.
pub fn to_yaml(pipeline: &Pipeline) -> ConfigResult<String> {
    Ok(serde_yaml::to_string(pipeline)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::RunMode;

    const SAMPLE: &str = r#"
name: demo
workdir: /tmp/demo
timeout: 600
environment:
  CI: "true"
pre: echo before
stages:
  - name: build
    run_mode: serial
    jobs:
      - name: compile
        image: rust:1.85
        steps:
          - name: check
            command: cargo check
            timeout: 120
  - name: test
    jobs:
      - name: unit
        steps:
          - name: run
            command: cargo test
"#;

    #[test]
    fn parses_the_full_schema() {
        let pipeline = parse_pipeline(SAMPLE).unwrap();

        assert_eq!(pipeline.name, "demo");
        assert_eq!(pipeline.workdir, "/tmp/demo");
        assert_eq!(pipeline.timeout, 600);
        assert_eq!(pipeline.environment["CI"], "true");
        assert_eq!(pipeline.pre, "echo before");
        assert_eq!(pipeline.stages.len(), 2);
        assert_eq!(pipeline.stages[0].run_mode, RunMode::Serial);
        // run_mode defaults to parallel.
        assert_eq!(pipeline.stages[1].run_mode, RunMode::Parallel);
        assert_eq!(pipeline.stages[0].jobs[0].image, "rust:1.85");
        assert_eq!(pipeline.stages[0].jobs[0].steps[0].timeout, 120);
    }

    #[test]
    fn parses_plugin_language_and_service_steps() {
        let yaml = r##"
name: extras
stages:
  - name: s
    jobs:
      - name: j
        steps:
          - name: plugged
            command: echo hi
            plugin:
              image: ghcr.io/acme/notify:1
              settings:
                channel: "#ci"
          - name: sugar
            command: npm test
            language:
              name: node
              version: "22"
          - name: deploy
            service:
              type: docker-compose
              version: v1
              name: db
              config: "services: {}"
"##;
        let pipeline = parse_pipeline(yaml).unwrap();
        let steps = &pipeline.stages[0].jobs[0].steps;
        assert_eq!(
            steps[0].plugin.as_ref().unwrap().image,
            "ghcr.io/acme/notify:1"
        );
        assert_eq!(steps[1].language.as_ref().unwrap().name, "node");
        assert_eq!(steps[2].service.as_ref().unwrap().kind, "docker-compose");
    }

    #[test]
    fn round_trips_up_to_defaulting() {
        let pipeline = parse_pipeline(SAMPLE).unwrap();
        let yaml = to_yaml(&pipeline).unwrap();
        let again = parse_pipeline(&yaml).unwrap();

        assert_eq!(again.name, pipeline.name);
        assert_eq!(again.stages.len(), pipeline.stages.len());
        assert_eq!(again.timeout, pipeline.timeout);
        assert_eq!(
            again.stages[0].jobs[0].steps[0].command,
            pipeline.stages[0].jobs[0].steps[0].command
        );
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            parse_pipeline("{unclosed"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
