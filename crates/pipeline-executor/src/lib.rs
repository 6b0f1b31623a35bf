//! Command execution backends for the pipeline runner.
//!
//! Engines run a single step command to completion: "host" spawns a local
//! shell, "docker" drives a container through the Docker daemon. Remote
//! engines (ssh, idp) are parsed and validated by the core but have no
//! in-tree executor; embedders register their own.

pub mod docker;
pub mod host;

pub use docker::DockerExecutor;
pub use host::HostExecutor;

use std::sync::Arc;

use pipeline_core::ExecutorRegistry;
use tracing::warn;

/// Registry with the built-in engines: host always, docker when the
/// daemon socket is reachable.
pub fn default_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register("host", Arc::new(HostExecutor));
    match DockerExecutor::new() {
        Ok(docker) => registry.register("docker", Arc::new(docker)),
        Err(err) => warn!(error = %err, "docker engine unavailable"),
    }
    registry
}
