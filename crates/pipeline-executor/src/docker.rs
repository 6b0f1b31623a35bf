//! Docker executor: runs the step command inside a container.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use pipeline_core::{CommandExecutor, CommandSpec, Error, Result, RunIo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives a single step command through the local Docker daemon: pull,
/// create, stream logs, wait, remove. The step workdir is bind-mounted at
/// the same path inside the container.
pub struct DockerExecutor {
    docker: Docker,
}

impl DockerExecutor {
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| Error::Internal(err.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    fn container_name(step_id: &str) -> String {
        format!("pipeline-step-{}", step_id.replace('.', "-"))
    }

    fn credentials(spec: &CommandSpec) -> Option<DockerCredentials> {
        if spec.image_registry_username.is_empty() && spec.image_registry_password.is_empty() {
            return None;
        }
        Some(DockerCredentials {
            username: Some(spec.image_registry_username.clone()),
            password: Some(spec.image_registry_password.clone()),
            serveraddress: (!spec.image_registry.is_empty())
                .then(|| spec.image_registry.clone()),
            ..Default::default()
        })
    }

    async fn pull_image(&self, spec: &CommandSpec) {
        info!(image = %spec.image, "pulling image");
        let options = CreateImageOptions {
            from_image: spec.image.clone(),
            ..Default::default()
        };
        let mut pull = self
            .docker
            .create_image(Some(options), None, Self::credentials(spec));
        while let Some(progress) = pull.next().await {
            match progress {
                Ok(update) => {
                    if let Some(status) = update.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(err) => {
                    // The image may exist locally; the create call decides.
                    warn!(error = %err, "pull warning");
                }
            }
        }
    }

    async fn remove(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(err) = self.docker.remove_container(name, Some(options)).await {
            warn!(container = %name, error = %err, "failed to remove container");
        }
    }
}

#[async_trait]
impl CommandExecutor for DockerExecutor {
    async fn run(&self, spec: &CommandSpec, io: &RunIo, cancel: CancellationToken) -> Result<()> {
        let name = Self::container_name(&spec.id);

        self.pull_image(spec).await;

        let env: Vec<String> = spec
            .environment
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let host_config = HostConfig {
            binds: (!spec.workdir.is_empty())
                .then(|| vec![format!("{0}:{0}:rw", spec.workdir)]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec![spec.shell.clone(), "-c".into(), spec.command.clone()]),
            env: Some(env),
            working_dir: (!spec.workdir.is_empty()).then(|| spec.workdir.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        info!(container = %name, image = %spec.image, "creating container");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|err| Error::ExecutionFailed(format!("failed to create container: {err}")))?;

        if let Err(err) = self
            .docker
            .start_container(&name, None::<StartContainerOptions<String>>)
            .await
        {
            self.remove(&name).await;
            return Err(Error::ExecutionFailed(format!(
                "failed to start container: {err}"
            )));
        }

        let outcome = tokio::select! {
            outcome = self.follow(&name, io) => outcome,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };

        self.remove(&name).await;
        outcome
    }
}

impl DockerExecutor {
    /// Stream container logs into the sinks, then wait for the exit code.
    async fn follow(&self, name: &str, io: &RunIo) -> Result<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut logs = self.docker.logs(name, Some(options));
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(LogOutput::StdErr { message }) => io.stderr.append(&message),
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    io.stdout.append(&message)
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(container = %name, error = %err, "log stream error");
                    break;
                }
            }
        }

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut wait = self.docker.wait_container(name, Some(options));
        match wait.next().await {
            Some(Ok(exit)) if exit.status_code == 0 => Ok(()),
            Some(Ok(exit)) => Err(Error::ExecutionFailed(format!(
                "command exited with status {}",
                exit.status_code
            ))),
            // bollard surfaces non-zero exits through the wait error path
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Err(
                Error::ExecutionFailed(format!("command exited with status {code}")),
            ),
            Some(Err(err)) => Err(Error::ExecutionFailed(format!(
                "failed to wait for container: {err}"
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_stable_path_labels() {
        assert_eq!(
            DockerExecutor::container_name("run.0.1.2"),
            "pipeline-step-run-0-1-2"
        );
        assert_eq!(
            DockerExecutor::container_name("run.0.1.2"),
            DockerExecutor::container_name("run.0.1.2"),
        );
    }
}
