//! The stage: a group of jobs, run serial or parallel.
//!
//! In parallel mode the first error cancels a stage-scoped token that all
//! sibling jobs observe; the stage waits for every job to terminate before
//! surfacing the first error received.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::command::RunEnv;
use crate::context::{Progress, RunContext};
use crate::error::{Error, Result};
use crate::inherit::{Inherited, merge_env, merge_str};
use crate::job::Job;
use crate::state::{State, settle};

/// How a stage schedules its jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Serial,
    #[default]
    Parallel,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<Job>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub workdir: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    pub run_mode: RunMode,

    #[serde(skip_serializing_if = "crate::is_zero")]
    pub timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

impl Stage {
    pub fn setup(&mut self, id: &str, parent: &Inherited) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        merge_str(&mut self.image, &parent.image);
        merge_str(&mut self.workdir, &parent.workdir);
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
            ..Default::default()
        };
        for (index, job) in self.jobs.iter_mut().enumerate() {
            job.setup(&format!("{id}.{index}"), &inherited)?;
        }

        Ok(())
    }

    pub async fn run(&mut self, ctx: &RunContext, env: &RunEnv, cfg: &Progress) -> Result<()> {
        if self.state.is_none() {
            return Err(Error::Validation(
                "stage must be set up before running".into(),
            ));
        }

        let label = cfg.label("stage", &self.name);
        env.io.stdout.append_line(&format!("{label} start"));

        let scope = ctx.child_with_timeout(self.timeout);
        let result = match self.run_mode {
            RunMode::Serial => self.run_serial(&scope, env, &label).await,
            RunMode::Parallel => self.run_parallel(&scope, env, &label).await,
        };

        env.io.stdout.append_line(&format!("{label} done"));

        match self.state.as_mut() {
            Some(state) => settle(state, "stage", self.timeout, &scope, result),
            None => result,
        }
    }

    async fn run_serial(&mut self, scope: &RunContext, env: &RunEnv, label: &str) -> Result<()> {
        let total = self.jobs.len();
        for (index, job) in self.jobs.iter_mut().enumerate() {
            let progress = Progress {
                total,
                current: index + 1,
                parent: label.to_string(),
            };
            job.run(scope, env, &progress).await?;
        }
        Ok(())
    }

    async fn run_parallel(&mut self, scope: &RunContext, env: &RunEnv, label: &str) -> Result<()> {
        let group = scope.child();
        let jobs = std::mem::take(&mut self.jobs);
        let total = jobs.len();

        let mut set = tokio::task::JoinSet::new();
        for (index, mut job) in jobs.into_iter().enumerate() {
            let group = group.clone();
            let env = env.clone();
            let progress = Progress {
                total,
                current: index + 1,
                parent: label.to_string(),
            };
            set.spawn(async move {
                let result = job.run(&group, &env, &progress).await;
                (index, job, result)
            });
        }

        let mut finished: Vec<Option<Job>> = (0..total).map(|_| None).collect();
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, job, result)) => {
                    finished[index] = Some(job);
                    if let Err(err) = result {
                        if first_error.is_none() {
                            first_error = Some(err);
                            group.cancel();
                        }
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error = Some(Error::Internal(format!("job task failed: {join_err}")));
                        group.cancel();
                    }
                }
            }
        }
        self.jobs = finished.into_iter().flatten().collect();

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::command::{CommandExecutor, CommandSpec, ExecutorRegistry};
    use crate::output::{NullSink, RunIo, SharedSink};
    use crate::step::Step;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Interprets "sleep <ms>", "fail" and anything else as success.
    struct FakeExecutor;

    #[async_trait]
    impl CommandExecutor for FakeExecutor {
        async fn run(
            &self,
            spec: &CommandSpec,
            _io: &RunIo,
            cancel: CancellationToken,
        ) -> Result<()> {
            if let Some(ms) = spec.command.strip_prefix("sleep ") {
                let ms: u64 = ms.parse().unwrap_or(0);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            } else if spec.command == "fail" {
                Err(Error::ExecutionFailed("command exited with status 1".into()))
            } else {
                Ok(())
            }
        }
    }

    fn test_env() -> RunEnv {
        let mut registry = ExecutorRegistry::new();
        registry.register("host", Arc::new(FakeExecutor));
        let sink: SharedSink = Arc::new(NullSink);
        RunEnv {
            executors: Arc::new(registry),
            io: RunIo {
                stdout: sink.clone(),
                stderr: sink,
            },
        }
    }

    fn single_step_job(command: &str) -> Job {
        Job {
            name: command.into(),
            steps: vec![Step {
                name: command.into(),
                command: command.into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn parallel_first_failure_cancels_siblings() {
        let mut stage = Stage {
            name: "s".into(),
            jobs: vec![single_step_job("sleep 30000"), single_step_job("fail")],
            ..Default::default()
        };
        stage.setup("sid", &Inherited::default()).unwrap();

        let started = std::time::Instant::now();
        let err = stage
            .run(&RunContext::new(), &test_env(), &Progress::default())
            .await
            .unwrap_err();

        // Returns well before the sleeping job would have finished.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("status 1"));
        assert_eq!(stage.state.as_ref().unwrap().status, Status::Failed);

        let sleeper = &stage.jobs[0];
        assert_eq!(sleeper.state.as_ref().unwrap().status, Status::Cancelled);
    }

    #[tokio::test]
    async fn serial_mode_runs_in_order_and_aborts() {
        let mut stage = Stage {
            name: "s".into(),
            run_mode: RunMode::Serial,
            jobs: vec![
                single_step_job("ok"),
                single_step_job("fail"),
                single_step_job("never"),
            ],
            ..Default::default()
        };
        stage.setup("sid", &Inherited::default()).unwrap();

        stage
            .run(&RunContext::new(), &test_env(), &Progress::default())
            .await
            .unwrap_err();

        assert_eq!(stage.jobs[0].state.as_ref().unwrap().status, Status::Succeeded);
        assert_eq!(stage.jobs[1].state.as_ref().unwrap().status, Status::Failed);
        // Never started: still in its setup state.
        assert_eq!(stage.jobs[2].state.as_ref().unwrap().status, Status::Running);
    }

    #[tokio::test]
    async fn parallel_stage_succeeds_when_all_jobs_do() {
        let mut stage = Stage {
            name: "s".into(),
            jobs: vec![single_step_job("a"), single_step_job("b")],
            ..Default::default()
        };
        stage.setup("sid", &Inherited::default()).unwrap();

        stage
            .run(&RunContext::new(), &test_env(), &Progress::default())
            .await
            .unwrap();

        assert_eq!(stage.state.as_ref().unwrap().status, Status::Succeeded);
        assert!(
            stage
                .jobs
                .iter()
                .all(|j| j.state.as_ref().unwrap().status == Status::Succeeded)
        );
    }

    #[tokio::test]
    async fn stage_timeout_fails_with_rewritten_error() {
        let mut stage = Stage {
            name: "s".into(),
            timeout: 1,
            jobs: vec![single_step_job("sleep 5000")],
            ..Default::default()
        };
        stage.setup("sid", &Inherited::default()).unwrap();

        let err = stage
            .run(&RunContext::new(), &test_env(), &Progress::default())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("stage timeout after 1 seconds"));
        assert_eq!(stage.state.as_ref().unwrap().status, Status::Failed);
    }
}
