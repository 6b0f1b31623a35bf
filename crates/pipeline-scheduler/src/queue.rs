//! The admission queue.
//!
//! Items are FIFO among `pending`; at most `max_concurrent` are `running`
//! at any time. Cancel is final: once an item is `cancelled`, the natural
//! outcome of its run can no longer overwrite the status.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use pipeline_core::{Error, Pipeline, Result, Status};
use pipeline_store::RecordStore;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub yaml: String,
    #[serde(skip)]
    pipeline: Option<Pipeline>,
    #[serde(skip)]
    cancel: Option<CancellationToken>,
}

/// An admitted item handed to the worker: the pipeline to run plus the
/// fresh cancel token assigned at dispatch time.
pub struct Dispatch {
    pub id: String,
    pub name: String,
    pub pipeline: Pipeline,
    pub yaml: String,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_concurrent: usize,
    pub current_concurrent: usize,
}

#[derive(Default)]
struct QueueInner {
    items: HashMap<String, QueueItem>,
    pending: VecDeque<String>,
    running: HashSet<String>,
}

pub struct Queue {
    inner: Mutex<QueueInner>,
    max_concurrent: usize,
    store: Arc<RecordStore>,
    workdir: PathBuf,
    environment: HashMap<String, String>,
}

impl Queue {
    pub fn new(
        max_concurrent: usize,
        store: Arc<RecordStore>,
        workdir: PathBuf,
        environment: HashMap<String, String>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            max_concurrent: max_concurrent.max(1),
            store,
            workdir,
            environment,
        }
    }

    pub(crate) fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub(crate) fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }

    pub(crate) fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    fn run_workdir(&self, id: &str) -> String {
        self.workdir.join(id).to_string_lossy().into_owned()
    }

    /// Admit a pipeline. The run record is created immediately with status
    /// `pending` so the REST surface sees queued submissions.
    pub fn enqueue(&self, id: &str, name: &str, pipeline: Pipeline, yaml: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.items.contains_key(id) {
            return Err(Error::Conflict(format!("pipeline {id} already in queue")));
        }

        let config = json!({
            "name": pipeline.name,
            "workdir": self.run_workdir(id),
            "timeout": pipeline.timeout,
            "image": pipeline.image,
        });

        inner.items.insert(
            id.to_string(),
            QueueItem {
                id: id.to_string(),
                name: name.to_string(),
                status: Status::Pending,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
                error: None,
                yaml: yaml.to_string(),
                pipeline: Some(pipeline),
                cancel: None,
            },
        );
        inner.pending.push_back(id.to_string());
        drop(inner);

        self.store.create(id, name, yaml, config);
        info!(id = %id, name = %name, "pipeline enqueued");

        Ok(())
    }

    /// Pop the next pending item when a concurrency slot is free. The item
    /// transitions to `running` and receives a fresh cancel token.
    pub fn dequeue(&self) -> Option<Dispatch> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let inner = &mut *inner;

        if inner.running.len() >= self.max_concurrent {
            return None;
        }
        let id = inner.pending.pop_front()?;
        let item = inner.items.get_mut(&id)?;

        let cancel = CancellationToken::new();
        item.status = Status::Running;
        item.started_at = Some(Utc::now());
        item.cancel = Some(cancel.clone());
        inner.running.insert(id.clone());

        Some(Dispatch {
            id: item.id.clone(),
            name: item.name.clone(),
            pipeline: item.pipeline.take().unwrap_or_default(),
            yaml: item.yaml.clone(),
            cancel,
        })
    }

    pub fn get(&self, id: &str) -> Option<QueueItem> {
        self.inner
            .lock()
            .expect("queue lock poisoned")
            .items
            .get(id)
            .cloned()
    }

    /// Snapshot of every item, newest first.
    pub fn list(&self) -> Vec<QueueItem> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut items: Vec<QueueItem> = inner.items.values().cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    /// Cancel a pending or running item. Returns false for unknown ids and
    /// items that are already terminal.
    pub fn cancel(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let inner = &mut *inner;
        let Some(item) = inner.items.get_mut(id) else {
            return false;
        };

        match item.status {
            Status::Running => {
                if let Some(cancel) = &item.cancel {
                    cancel.cancel();
                }
                inner.running.remove(id);
            }
            Status::Pending => {
                inner.pending.retain(|pending| pending != id);
            }
            _ => return false,
        }

        item.status = Status::Cancelled;
        item.error = Some("cancelled by user".into());
        item.ended_at = Some(Utc::now());
        self.store
            .update_status(id, Status::Cancelled, Some("cancelled by user"));
        info!(id = %id, "pipeline cancelled");

        true
    }

    /// Reconcile the terminal outcome of a run. Checked under the lock so
    /// an item cancelled while its command was finishing stays `cancelled`.
    pub(crate) fn finish(&self, id: &str, result: &Result<()>) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let inner = &mut *inner;
        let Some(item) = inner.items.get_mut(id) else {
            return;
        };
        if item.status == Status::Cancelled {
            return;
        }

        inner.running.remove(id);
        item.ended_at = Some(Utc::now());

        match result {
            Err(err) if err.is_cancelled() => {
                item.status = Status::Cancelled;
                item.error = Some("cancelled by user".into());
                self.store
                    .update_status(id, Status::Cancelled, Some("cancelled by user"));
                info!(id = %id, "pipeline cancelled");
            }
            Err(err) => {
                item.status = Status::Failed;
                item.error = Some(err.to_string());
                self.store
                    .update_status(id, Status::Failed, Some(&err.to_string()));
                info!(id = %id, error = %err, "pipeline failed");
            }
            Ok(()) => {
                item.status = Status::Succeeded;
                self.store.update_status(id, Status::Succeeded, None);
                info!(id = %id, "pipeline succeeded");
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let mut stats = QueueStats {
            total: inner.items.len(),
            max_concurrent: self.max_concurrent,
            current_concurrent: inner.running.len(),
            ..Default::default()
        };
        for item in inner.items.values() {
            match item.status {
                Status::Pending => stats.pending += 1,
                Status::Running => stats.running += 1,
                Status::Succeeded => stats.succeeded += 1,
                Status::Failed => stats.failed += 1,
                Status::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}
