//! Step services.
//!
//! A service step deploys a named long-running service definition through
//! docker compose, docker swarm or kubernetes. The step command is
//! rewritten into a shell script that materializes the config and runs
//! the matching deploy command.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Service {
    /// Service schema version; only "v1" is supported.
    pub version: String,

    /// Deployment mechanism: "docker-compose" | "docker-swarm" | "kubernetes".
    #[serde(rename = "type")]
    pub kind: String,

    /// Raw config document, or a path to an existing config file.
    pub config: String,

    pub name: String,
}

impl Service {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("service name is required".into()));
        }
        if self.version.is_empty() {
            return Err(Error::Validation("service version is required".into()));
        }
        match self.version.as_str() {
            "v1" => {}
            "v2" => {
                return Err(Error::Validation("service v2 is not implemented".into()));
            }
            other => {
                return Err(Error::Validation(format!(
                    "unsupported service version: {other}"
                )));
            }
        }
        match self.kind.as_str() {
            "docker-compose" | "docker-swarm" | "kubernetes" => Ok(()),
            other => Err(Error::Validation(format!(
                "unsupported service type: {other}"
            ))),
        }
    }

    /// Build the deploy command. When `config` names an existing file it is
    /// used directly; otherwise the config body is written to a temp file
    /// by the generated script.
    pub(crate) fn build_command(&self) -> Result<String> {
        self.validate()?;

        let mut script = String::new();
        let file = if Path::new(&self.config).is_file() {
            self.config.clone()
        } else {
            let tmp = format!("${{TMPDIR:-/tmp}}/pipeline-service-{}.yaml", self.name);
            script.push_str(&format!(
                "cat > \"{tmp}\" <<'PIPELINE_SERVICE_EOF'\n{}\nPIPELINE_SERVICE_EOF\n",
                self.config
            ));
            tmp
        };

        let deploy = match self.kind.as_str() {
            "docker-compose" => format!("docker compose -p {} -f \"{file}\" up -d", self.name),
            "docker-swarm" => format!("docker stack deploy -c \"{file}\" {}", self.name),
            "kubernetes" => format!("kubectl apply -f \"{file}\""),
            // validate() has already rejected everything else
            other => return Err(Error::Validation(format!("unsupported service type: {other}"))),
        };
        script.push_str(&deploy);

        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(kind: &str) -> Service {
        Service {
            version: "v1".into(),
            kind: kind.into(),
            config: "services:\n  db:\n    image: postgres:16".into(),
            name: "db".into(),
        }
    }

    #[test]
    fn compose_command_materializes_config() {
        let command = service("docker-compose").build_command().unwrap();
        assert!(command.contains("PIPELINE_SERVICE_EOF"));
        assert!(command.contains("docker compose -p db"));
        assert!(command.ends_with("up -d"));
    }

    #[test]
    fn swarm_and_kubernetes_use_their_deploy_commands() {
        assert!(
            service("docker-swarm")
                .build_command()
                .unwrap()
                .contains("docker stack deploy")
        );
        assert!(
            service("kubernetes")
                .build_command()
                .unwrap()
                .contains("kubectl apply -f")
        );
    }

    #[test]
    fn existing_file_is_used_as_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut svc = service("kubernetes");
        svc.config = file.path().to_string_lossy().into_owned();

        let command = svc.build_command().unwrap();
        assert!(!command.contains("PIPELINE_SERVICE_EOF"));
        assert!(command.contains(&svc.config));
    }

    #[test]
    fn v2_is_not_implemented() {
        let mut svc = service("kubernetes");
        svc.version = "v2".into();
        let err = svc.build_command().unwrap_err();
        assert!(err.to_string().contains("not implemented"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = service("nomad").build_command().unwrap_err();
        assert!(err.to_string().contains("unsupported service type"));
    }

    #[test]
    fn name_and_version_are_required() {
        let mut svc = service("kubernetes");
        svc.name = String::new();
        assert!(svc.validate().is_err());

        let mut svc = service("kubernetes");
        svc.version = String::new();
        assert!(svc.validate().is_err());
    }
}
