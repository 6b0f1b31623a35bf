//! Host executor: runs the step command as a local process.

use std::process::Stdio;

use async_trait::async_trait;
use pipeline_core::{CommandExecutor, CommandSpec, Error, Result, RunIo, SharedSink};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Executes `<shell> -c <command>` on the local host, streaming output
/// chunks into the step's sinks. The command environment is layered over
/// the process environment so PATH and friends keep working.
pub struct HostExecutor;

#[async_trait]
impl CommandExecutor for HostExecutor {
    async fn run(&self, spec: &CommandSpec, io: &RunIo, cancel: CancellationToken) -> Result<()> {
        debug!(id = %spec.id, shell = %spec.shell, "spawning host command");

        let mut command = Command::new(&spec.shell);
        command
            .arg("-c")
            .arg(&spec.command)
            .envs(&spec.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !spec.workdir.is_empty() {
            command.current_dir(&spec.workdir);
        }

        let mut child = command
            .spawn()
            .map_err(|err| Error::ExecutionFailed(format!("failed to spawn command: {err}")))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let status = tokio::select! {
            status = async {
                tokio::join!(
                    copy_stream(stdout, io.stdout.clone()),
                    copy_stream(stderr, io.stderr.clone()),
                );
                child.wait().await
            } => status
                .map_err(|err| Error::ExecutionFailed(format!("failed to wait for command: {err}")))?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
        };

        if !status.success() {
            return Err(Error::ExecutionFailed(match status.code() {
                Some(code) => format!("command exited with status {code}"),
                None => "command terminated by signal".into(),
            }));
        }

        Ok(())
    }
}

async fn copy_stream<R: AsyncRead + Unpin>(reader: Option<R>, sink: SharedSink) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.append(&buf[..n]),
        }
    }
}
