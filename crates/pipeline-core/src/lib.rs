//! Core domain types and execution tree for the pipeline runner.
//!
//! This crate contains:
//! - The four execution-tree levels: [`Pipeline`] → [`Stage`] → [`Job`] → [`Step`]
//! - Lifecycle state and status transitions
//! - Run contexts carrying deadlines and cancellation
//! - Engine URI parsing and the command-executor seam
//! - Output sinks for stdout/stderr fan-out
//! - The wire envelope shared by the service and its clients

pub mod command;
pub mod context;
pub mod engine;
pub mod error;
pub mod inherit;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod protocol;
pub mod service;
pub mod stage;
pub mod state;
pub mod step;

pub use command::{CommandExecutor, CommandSpec, ExecutorRegistry, RunEnv};
pub use context::{Cause, Progress, RunContext};
pub use engine::EngineSpec;
pub use error::{Error, Result};
pub use inherit::Inherited;
pub use job::Job;
pub use output::{OutputSink, RunIo, SharedSink};
pub use pipeline::{Pipeline, RunOptions};
pub use plugin::Plugin;
pub use protocol::{Envelope, EnvelopeKind};
pub use service::Service;
pub use stage::{RunMode, Stage};
pub use state::{State, Status};
pub use step::{Language, Step};

/// Default timeout for pipelines and steps, in seconds (1 day).
pub const DEFAULT_TIMEOUT: u64 = 86_400;

/// Runner version reported in the injected environment and health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) fn is_zero(n: &u64) -> bool {
    *n == 0
}
