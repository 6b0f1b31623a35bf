//! The job: an ordered sequence of steps, fail-fast.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::command::RunEnv;
use crate::context::{Progress, RunContext};
use crate::error::{Error, Result};
use crate::inherit::{Inherited, merge_env, merge_str};
use crate::state::{State, settle};
use crate::step::Step;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub name: String,
    pub steps: Vec<Step>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub workdir: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_registry_password: String,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(skip_serializing_if = "crate::is_zero")]
    pub timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

impl Job {
    /// Merge inheritable fields from the parent and set up every step with
    /// the composed `parent.index` id.
    pub fn setup(&mut self, id: &str, parent: &Inherited) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        merge_str(&mut self.image, &parent.image);
        merge_str(&mut self.workdir, &parent.workdir);
        merge_str(&mut self.image_registry, &parent.image_registry);
        merge_str(
            &mut self.image_registry_username,
            &parent.image_registry_username,
        );
        merge_str(
            &mut self.image_registry_password,
            &parent.image_registry_password,
        );
        merge_env(&mut self.environment, &parent.environment);
        if self.timeout == 0 {
            self.timeout = parent.timeout;
        }

        self.state = Some(State::running(id));

        let inherited = Inherited {
            workdir: self.workdir.clone(),
            image: self.image.clone(),
            environment: self.environment.clone(),
            timeout: self.timeout,
            image_registry: self.image_registry.clone(),
            image_registry_username: self.image_registry_username.clone(),
            image_registry_password: self.image_registry_password.clone(),
        };
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.setup(&format!("{id}.{index}"), &inherited)?;
        }

        Ok(())
    }

    /// Run steps in definition order; the first error aborts the rest.
    pub async fn run(&mut self, ctx: &RunContext, env: &RunEnv, cfg: &Progress) -> Result<()> {
        if self.state.is_none() {
            return Err(Error::Validation("job must be set up before running".into()));
        }

        let label = cfg.label("job", &self.name);
        env.io.stdout.append_line(&format!("{label} start"));

        let scope = ctx.child_with_timeout(self.timeout);
        let total = self.steps.len();
        let mut result = Ok(());
        for (index, step) in self.steps.iter_mut().enumerate() {
            let progress = Progress {
                total,
                current: index + 1,
                parent: label.clone(),
            };
            if let Err(err) = step.run(&scope, env, &progress).await {
                result = Err(err);
                break;
            }
        }

        env.io.stdout.append_line(&format!("{label} done"));

        match self.state.as_mut() {
            Some(state) => settle(state, "job", self.timeout, &scope, result),
            None => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::command::{CommandExecutor, CommandSpec, ExecutorRegistry};
    use crate::output::test_support::CaptureSink;
    use crate::output::{RunIo, SharedSink};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Succeeds unless the command is "fail", recording executed commands.
    #[derive(Default)]
    struct ScriptedExecutor {
        ran: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(
            &self,
            spec: &CommandSpec,
            _io: &RunIo,
            _cancel: CancellationToken,
        ) -> Result<()> {
            self.ran.lock().unwrap().push(spec.command.clone());
            if spec.command == "fail" {
                return Err(Error::ExecutionFailed("command exited with status 1".into()));
            }
            Ok(())
        }
    }

    fn test_env(executor: Arc<ScriptedExecutor>) -> RunEnv {
        let mut registry = ExecutorRegistry::new();
        registry.register("host", executor);
        let sink = Arc::new(CaptureSink::default());
        RunEnv {
            executors: Arc::new(registry),
            io: RunIo {
                stdout: sink.clone() as SharedSink,
                stderr: sink as SharedSink,
            },
        }
    }

    fn step(command: &str) -> Step {
        Step {
            name: command.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    #[test]
    fn setup_assigns_child_ids_and_inheritance() {
        let mut job = Job {
            name: "j".into(),
            steps: vec![step("a"), step("b")],
            image: "job:img".into(),
            timeout: 30,
            ..Default::default()
        };

        job.setup("run.0.1", &Inherited::default()).unwrap();

        assert_eq!(job.state.as_ref().unwrap().id, "run.0.1");
        let ids: Vec<_> = job
            .steps
            .iter()
            .map(|s| s.state.as_ref().unwrap().id.clone())
            .collect();
        assert_eq!(ids, vec!["run.0.1.0", "run.0.1.1"]);
        assert!(job.steps.iter().all(|s| s.image == "job:img"));
        assert!(job.steps.iter().all(|s| s.timeout == 30));
    }

    #[tokio::test]
    async fn steps_run_in_order_and_fail_fast() {
        let executor = Arc::new(ScriptedExecutor::default());
        let env = test_env(executor.clone());
        let mut job = Job {
            name: "j".into(),
            steps: vec![step("a"), step("fail"), step("never")],
            ..Default::default()
        };
        job.setup("jid", &Inherited::default()).unwrap();

        let err = job
            .run(&RunContext::new(), &env, &Progress::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("status 1"));
        assert_eq!(*executor.ran.lock().unwrap(), vec!["a", "fail"]);
        assert_eq!(job.state.as_ref().unwrap().status, Status::Failed);
        assert_eq!(job.steps[2].state.as_ref().unwrap().status, Status::Running);
    }

    #[tokio::test]
    async fn job_succeeds_when_all_steps_do() {
        let executor = Arc::new(ScriptedExecutor::default());
        let env = test_env(executor);
        let mut job = Job {
            name: "j".into(),
            steps: vec![step("a"), step("b")],
            ..Default::default()
        };
        job.setup("jid", &Inherited::default()).unwrap();

        job.run(&RunContext::new(), &env, &Progress::default())
            .await
            .unwrap();

        let state = job.state.unwrap();
        assert_eq!(state.status, Status::Succeeded);
        assert!(state.succeed_at.is_some());
    }
}
