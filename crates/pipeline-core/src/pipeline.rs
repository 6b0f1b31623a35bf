//! The pipeline: ordered stages plus workdir and environment lifecycle.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::{ExecutorRegistry, RunEnv};
use crate::context::{Progress, RunContext};
use crate::error::{Error, Result};
use crate::inherit::Inherited;
use crate::job::Job;
use crate::output::{RunIo, SharedSink, StdoutSink};
use crate::stage::Stage;
use crate::state::{State, settle};
use crate::step::Step;
use crate::{DEFAULT_TIMEOUT, VERSION};

/// Environment key marking a process as running under the pipeline runner.
/// Its presence in the caller environment rejects nested pipelines.
pub const RUNNER_ENV_KEY: &str = "PIPELINE_RUNNER";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub name: String,

    pub stages: Vec<Stage>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub workdir: String,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,

    /// Timeout in seconds, default 86400 (1 day).
    #[serde(skip_serializing_if = "crate::is_zero")]
    pub timeout: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,

    /// Shell command run as a synthetic first stage.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pre: String,
    /// Shell command run as a synthetic last stage.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub post: String,

    #[serde(skip)]
    stdout: Option<SharedSink>,
    #[serde(skip)]
    stderr: Option<SharedSink>,
}

/// Per-run options.
pub struct RunOptions {
    /// Run id; a fresh UUIDv4 is generated when absent.
    pub id: Option<String>,
    pub executors: std::sync::Arc<ExecutorRegistry>,
}

impl RunOptions {
    pub fn new(executors: std::sync::Arc<ExecutorRegistry>) -> Self {
        Self {
            id: None,
            executors,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

fn current_dir_string() -> Option<String> {
    std::env::current_dir()
        .ok()
        .map(|dir| dir.to_string_lossy().into_owned())
}

impl Pipeline {
    pub fn set_workdir(&mut self, workdir: impl Into<String>) -> &mut Self {
        self.workdir = workdir.into();
        self
    }

    /// Merge additional environment, keeping keys the pipeline already has.
    pub fn merge_environment(&mut self, environment: &HashMap<String, String>) -> &mut Self {
        for (key, value) in environment {
            self.environment
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    pub fn set_stdout(&mut self, stdout: SharedSink) -> &mut Self {
        self.stdout = Some(stdout);
        self
    }

    pub fn set_stderr(&mut self, stderr: SharedSink) -> &mut Self {
        self.stderr = Some(stderr);
        self
    }

    /// Whether output sinks are already attached.
    pub fn has_output(&self) -> bool {
        self.stdout.is_some() || self.stderr.is_some()
    }

    fn io(&self) -> RunIo {
        let stdout = self
            .stdout
            .clone()
            .unwrap_or_else(|| std::sync::Arc::new(StdoutSink));
        let stderr = self.stderr.clone().unwrap_or_else(|| stdout.clone());
        RunIo { stdout, stderr }
    }

    fn prepare(&mut self, id: &str) -> Result<()> {
        if self.stdout.is_none() {
            self.stdout = Some(std::sync::Arc::new(StdoutSink));
        }
        if self.stderr.is_none() {
            self.stderr = self.stdout.clone();
        }

        if self.name.is_empty() {
            return Err(Error::Validation("pipeline name is required".into()));
        }

        let current_dir = current_dir_string()
            .ok_or_else(|| Error::Internal("cannot resolve current directory".into()))?;
        if self.workdir.is_empty() {
            self.workdir = current_dir.clone();
        }

        if self.timeout == 0 {
            self.timeout = DEFAULT_TIMEOUT;
        }

        // Reject nested pipelines before touching the filesystem.
        if self.environment.contains_key(RUNNER_ENV_KEY) {
            return Err(Error::Validation(
                "already inside a pipeline, nested pipelines are not allowed".into(),
            ));
        }
        self.environment
            .insert(RUNNER_ENV_KEY.into(), "pipeline".into());
        self.environment
            .insert("PIPELINE_RUNNER_OS".into(), std::env::consts::OS.into());
        self.environment
            .insert("PIPELINE_RUNNER_ARCH".into(), std::env::consts::ARCH.into());
        self.environment
            .insert("PIPELINE_RUNNER_VERSION".into(), VERSION.into());
        self.environment.insert(
            "PIPELINE_RUNNER_USER".into(),
            std::env::var("USER").unwrap_or_default(),
        );
        self.environment
            .insert("PIPELINE_RUNNER_WORKDIR".into(), current_dir.clone());
        self.environment
            .insert("PIPELINE_NAME".into(), self.name.clone());
        self.environment
            .insert("PIPELINE_WORKDIR".into(), self.workdir.clone());

        // The current directory is never created (nor destroyed later).
        if self.workdir != current_dir && !Path::new(&self.workdir).exists() {
            info!(workdir = %self.workdir, "creating workdir");
            std::fs::create_dir_all(&self.workdir).map_err(|err| {
                Error::Internal(format!("failed to create workdir {}: {err}", self.workdir))
            })?;
        }

        if self.stages.is_empty() {
            return Err(Error::Validation(
                "no stages found, at least one stage is required".into(),
            ));
        }

        if !self.pre.is_empty() {
            self.stages.insert(0, synthetic_stage("pre", &self.pre));
        }
        if !self.post.is_empty() {
            self.stages.push(synthetic_stage("post", &self.post));
        }

        self.state = Some(State::running(id));

        let inherited = Inherited {
            workdir: self.workdir.clone(),
            image: self.image.clone(),
            environment: self.environment.clone(),
            timeout: self.timeout,
            ..Default::default()
        };
        for (index, stage) in self.stages.iter_mut().enumerate() {
            stage.setup(&format!("{id}.{index}"), &inherited)?;
        }

        Ok(())
    }

    /// Remove the workdir. Never fails the run; problems are warned.
    /// The current directory, or an already-missing workdir, is left alone.
    fn clean(&self) {
        if self.workdir.is_empty() {
            return;
        }
        let Some(current_dir) = current_dir_string() else {
            return;
        };
        if self.workdir == current_dir {
            return;
        }
        if !Path::new(&self.workdir).exists() {
            return;
        }

        info!(workdir = %self.workdir, "cleaning workdir");
        if let Err(err) = std::fs::remove_dir_all(&self.workdir) {
            warn!(workdir = %self.workdir, error = %err, "failed to clean workdir");
        }
    }

    /// Run the pipeline: prepare, execute stages in order, settle state
    /// and clean the workdir on success. A failed run preserves its
    /// workdir for debugging.
    pub async fn run(&mut self, ctx: &RunContext, opts: RunOptions) -> Result<()> {
        let id = opts
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        info!(name = %self.name, id = %id, "pipeline run starting");
        self.prepare(&id)?;

        let io = self.io();
        io.stdout.append_line("[pipeline] start");
        io.stdout.append_line(&format!("[pipeline] version: {VERSION}"));
        io.stdout.append_line(&format!("[pipeline] name: {}", self.name));
        io.stdout
            .append_line(&format!("[pipeline] workdir: {}", self.workdir));

        let env = RunEnv {
            executors: opts.executors,
            io,
        };
        let scope = ctx.child_with_timeout(self.timeout);

        let total = self.stages.len();
        let mut result = Ok(());
        for (index, stage) in self.stages.iter_mut().enumerate() {
            let progress = Progress {
                total,
                current: index + 1,
                parent: String::new(),
            };
            if let Err(err) = stage.run(&scope, &env, &progress).await {
                result = Err(err);
                break;
            }
        }

        let outcome = match self.state.as_mut() {
            Some(state) => settle(state, "pipeline", self.timeout, &scope, result),
            None => result,
        };

        match &outcome {
            Ok(()) => {
                env.io.stdout.append_line("[pipeline] done");
                self.clean();
            }
            Err(err) => {
                error!(
                    name = %self.name,
                    id = %id,
                    workdir = %self.workdir,
                    error = %err,
                    "pipeline failed; workdir preserved for debugging"
                );
                env.io
                    .stderr
                    .append_line(&format!("[pipeline] failed: {err}"));
                env.io.stderr.append_line(&format!(
                    "[pipeline] workdir preserved for debugging: {}",
                    self.workdir
                ));
            }
        }

        outcome
    }
}

fn synthetic_stage(name: &str, command: &str) -> Stage {
    Stage {
        name: name.into(),
        jobs: vec![Job {
            name: name.into(),
            steps: vec![Step {
                name: name.into(),
                command: command.into(),
                ..Default::default()
            }],
            ..Default::default()
        }],
        ..Default::default()
    }
}
