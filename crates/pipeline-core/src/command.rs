//! The command-executor seam.
//!
//! A [`Step`](crate::Step) builds a [`CommandSpec`] and dispatches it to a
//! [`CommandExecutor`] looked up by engine name. Executors are registered
//! in an [`ExecutorRegistry`] passed at construction, never in process
//! globals, so tests stay hermetic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineSpec;
use crate::error::Result;
use crate::output::RunIo;

/// Everything an executor needs to run one step command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Path label of the step this command belongs to.
    pub id: String,
    pub command: String,
    pub environment: HashMap<String, String>,
    pub workdir: String,
    /// Shell the command is wrapped with, default `sh`.
    pub shell: String,
    pub image: String,
    pub image_registry: String,
    pub image_registry_username: String,
    pub image_registry_password: String,
    pub engine: EngineSpec,
}

/// Runs a single command to completion, streaming output into the sinks.
///
/// Implementations must honor the cancellation token: when it fires, the
/// command is aborted and the executor returns promptly with a cancelled
/// error.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, spec: &CommandSpec, io: &RunIo, cancel: CancellationToken) -> Result<()>;
}

/// Engine-name → executor mapping, built explicitly at startup.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn CommandExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn CommandExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandExecutor>> {
        self.executors.get(name).cloned()
    }
}

/// Shared run dependencies handed down the execution tree.
#[derive(Clone)]
pub struct RunEnv {
    pub executors: Arc<ExecutorRegistry>,
    pub io: RunIo,
}
