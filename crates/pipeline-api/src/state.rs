//! Application state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pipeline_core::ExecutorRegistry;
use pipeline_scheduler::Queue;
use pipeline_store::RecordStore;

/// How many run records the in-memory store keeps before evicting.
const STORE_CAPACITY: usize = 1000;

/// Server configuration, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Base path the whole surface is nested under.
    pub path: String,
    /// Base workdir; each run executes in `<workdir>/<run id>`.
    pub workdir: PathBuf,
    /// Environment merged into every submitted pipeline.
    pub environment: HashMap<String, String>,
    /// HTTP Basic credentials; both empty disables auth.
    pub username: String,
    pub password: String,
    pub max_concurrent: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            path: "/".into(),
            workdir: PathBuf::from("/tmp/pipeline"),
            environment: HashMap::new(),
            username: String::new(),
            password: String::new(),
            max_concurrent: 2,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<RecordStore>,
    /// Admission queue; submissions run inline when absent.
    pub queue: Option<Arc<Queue>>,
    pub executors: Arc<ExecutorRegistry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, executors: Arc<ExecutorRegistry>) -> Self {
        let store = Arc::new(RecordStore::new(Some(config.workdir.clone()), STORE_CAPACITY));
        let queue = Arc::new(Queue::new(
            config.max_concurrent,
            store.clone(),
            config.workdir.clone(),
            config.environment.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            queue: Some(queue),
            executors,
            started_at: Utc::now(),
        }
    }

    /// State without an admission queue: every submission runs inline.
    pub fn without_queue(config: ServerConfig, executors: Arc<ExecutorRegistry>) -> Self {
        let store = Arc::new(RecordStore::new(Some(config.workdir.clone()), STORE_CAPACITY));
        Self {
            config: Arc::new(config),
            store,
            queue: None,
            executors,
            started_at: Utc::now(),
        }
    }
}
