//! Worker loop: polls the queue and runs admitted pipelines.

use std::sync::Arc;
use std::time::Duration;

use pipeline_core::{ExecutorRegistry, RunContext, RunOptions, Status};
use pipeline_store::{LogKind, LogSink, RecordStore};
use serde_json::json;
use tracing::info;

use crate::queue::{Dispatch, Queue};

/// Polls the queue on a ticker (~1 Hz) and spawns a task per admitted
/// pipeline. Each run gets a namespaced workdir, the server environment,
/// and store-forwarding output sinks.
#[derive(Clone)]
pub struct Worker {
    queue: Arc<Queue>,
    store: Arc<RecordStore>,
    executors: Arc<ExecutorRegistry>,
    interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<Queue>, store: Arc<RecordStore>, executors: Arc<ExecutorRegistry>) -> Self {
        Self {
            queue,
            store,
            executors,
            interval: Duration::from_secs(1),
        }
    }

    /// Override the admission poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the admission loop forever. Spawn this on the runtime.
    pub async fn run(self) {
        info!("starting queue worker");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Some(dispatch) = self.queue.dequeue() {
                let worker = self.clone();
                tokio::spawn(async move {
                    worker.execute(dispatch).await;
                });
            }
        }
    }

    async fn execute(&self, dispatch: Dispatch) {
        let Dispatch {
            id,
            name,
            mut pipeline,
            yaml,
            cancel,
        } = dispatch;

        info!(id = %id, name = %name, "executing pipeline");

        let workdir = self
            .queue
            .workdir()
            .join(&id)
            .to_string_lossy()
            .into_owned();

        if self.store.get(&id).is_none() {
            let config = json!({
                "name": pipeline.name,
                "workdir": workdir,
                "timeout": pipeline.timeout,
                "image": pipeline.image,
            });
            self.store.create(&id, &name, &yaml, config);
        }
        self.store.update_status(&id, Status::Running, None);

        pipeline.set_workdir(workdir.as_str());
        pipeline.merge_environment(self.queue.environment());
        // The service may have attached tee sinks (socket + store) at
        // submission time; only default to store-forwarding sinks here.
        if !pipeline.has_output() {
            pipeline.set_stdout(Arc::new(LogSink::new(
                self.store.clone(),
                &id,
                LogKind::Stdout,
            )));
            pipeline.set_stderr(Arc::new(LogSink::new(
                self.store.clone(),
                &id,
                LogKind::Stderr,
            )));
        }

        let ctx = RunContext::with_cancel(cancel);
        let opts = RunOptions::new(self.executors.clone()).with_id(&id);
        let result = pipeline.run(&ctx, opts).await;

        self.queue.finish(&id, &result);
    }
}
