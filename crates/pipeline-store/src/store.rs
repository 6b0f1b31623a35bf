//! In-memory record store with a best-effort disk mirror.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use pipeline_core::Status;
use serde_json::Value;
use tracing::warn;

use crate::record::{LogEntry, LogKind, PipelineRecord};

/// Per-record cap on buffered log entries; older entries are dropped.
const MAX_LOG_ENTRIES: usize = 10_000;

const MIRROR_DIR: &str = ".pipeline_records";

/// Thread-safe store of pipeline run records.
///
/// Every operation succeeds regardless of disk errors; the JSON mirror
/// under `<workdir>/.pipeline_records/` is strictly best-effort.
pub struct RecordStore {
    records: RwLock<HashMap<String, PipelineRecord>>,
    max_size: usize,
    workdir: Option<PathBuf>,
}

impl RecordStore {
    pub fn new(workdir: Option<PathBuf>, max_size: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_size,
            workdir,
        }
    }

    /// Create a `pending` record, evicting the oldest one at capacity.
    pub fn create(&self, id: &str, name: &str, yaml: &str, config: Value) -> PipelineRecord {
        let record = PipelineRecord::new(id, name, yaml, config);

        let mut records = self.records.write().expect("record store lock poisoned");
        if records.len() >= self.max_size {
            if let Some(oldest) = records
                .values()
                .min_by_key(|r| r.started_at)
                .map(|r| r.id.clone())
            {
                records.remove(&oldest);
                self.delete_mirror(&oldest);
            }
        }
        records.insert(id.to_string(), record.clone());
        drop(records);

        self.mirror(&record);
        record
    }

    /// Fetch a record: memory first, then the disk mirror.
    pub fn get(&self, id: &str) -> Option<PipelineRecord> {
        if let Some(record) = self
            .records
            .read()
            .expect("record store lock poisoned")
            .get(id)
        {
            return Some(record.clone());
        }
        self.load_mirror(id)
    }

    /// Snapshot of records sorted by `started_at` descending, truncated to
    /// `limit` when positive.
    pub fn list(&self, limit: usize) -> Vec<PipelineRecord> {
        let records = self.records.read().expect("record store lock poisoned");
        let mut snapshot: Vec<PipelineRecord> = records.values().cloned().collect();
        snapshot.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if limit > 0 && limit < snapshot.len() {
            snapshot.truncate(limit);
        }
        snapshot
    }

    /// Advance a record's status, stamping the matching timestamp field.
    pub fn update_status(&self, id: &str, status: Status, error: Option<&str>) {
        let mut records = self.records.write().expect("record store lock poisoned");
        let Some(record) = records.get_mut(id) else {
            return;
        };

        record.status = status;
        let now = Utc::now();
        match status {
            Status::Succeeded => record.succeed_at = Some(now),
            Status::Failed => {
                record.failed_at = Some(now);
                if let Some(error) = error {
                    record.error = Some(error.to_string());
                }
            }
            Status::Cancelled => {
                record.cancelled_at = Some(now);
                if let Some(error) = error {
                    record.error = Some(error.to_string());
                }
            }
            Status::Pending | Status::Running => {}
        }

        let snapshot = record.clone();
        drop(records);
        self.mirror(&snapshot);
    }

    /// Append a log entry, keeping at most the last 10,000 per record.
    pub fn add_log(&self, id: &str, kind: LogKind, message: &str) {
        let mut records = self.records.write().expect("record store lock poisoned");
        let Some(record) = records.get_mut(id) else {
            return;
        };

        record.logs.push(LogEntry {
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        if record.logs.len() > MAX_LOG_ENTRIES {
            let excess = record.logs.len() - MAX_LOG_ENTRIES;
            record.logs.drain(..excess);
        }

        let snapshot = record.clone();
        drop(records);
        self.mirror(&snapshot);
    }

    /// Remove the record from memory and disk.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self
            .records
            .write()
            .expect("record store lock poisoned")
            .remove(id)
            .is_some();
        if removed {
            self.delete_mirror(id);
        }
        removed
    }

    fn mirror_path(&self, id: &str) -> Option<PathBuf> {
        self.workdir
            .as_ref()
            .map(|dir| dir.join(MIRROR_DIR).join(format!("{id}.json")))
    }

    fn mirror(&self, record: &PipelineRecord) {
        let Some(path) = self.mirror_path(&record.id) else {
            return;
        };
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                if let Err(err) = std::fs::create_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %err, "cannot create record mirror dir");
                    return;
                }
            }
        }
        match serde_json::to_vec(record) {
            Ok(data) => {
                if let Err(err) = std::fs::write(&path, data) {
                    warn!(path = %path.display(), error = %err, "cannot mirror record");
                }
            }
            Err(err) => warn!(id = %record.id, error = %err, "cannot serialize record"),
        }
    }

    fn load_mirror(&self, id: &str) -> Option<PipelineRecord> {
        let path = self.mirror_path(id)?;
        if !Path::new(&path).exists() {
            return None;
        }
        let data = std::fs::read(&path).ok()?;
        let record: PipelineRecord = serde_json::from_slice(&data).ok()?;

        self.records
            .write()
            .expect("record store lock poisoned")
            .insert(id.to_string(), record.clone());
        Some(record)
    }

    fn delete_mirror(&self, id: &str) {
        let Some(path) = self.mirror_path(id) else {
            return;
        };
        if path.exists() {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "cannot delete record mirror");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(dir: Option<PathBuf>, max_size: usize) -> RecordStore {
        RecordStore::new(dir, max_size)
    }

    #[test]
    fn create_and_get() {
        let store = store(None, 10);
        store.create("a", "demo", "name: demo", json!({"name": "demo"}));

        let record = store.get("a").unwrap();
        assert_eq!(record.name, "demo");
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.yaml, "name: demo");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn list_is_sorted_and_truncated() {
        let store = store(None, 10);
        for id in ["a", "b", "c"] {
            store.create(id, id, "", Value::Null);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let all = store.list(0);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "c");
        assert_eq!(all[2].id, "a");

        assert_eq!(store.list(2).len(), 2);
    }

    #[test]
    fn capacity_evicts_the_oldest() {
        let store = store(None, 2);
        store.create("old", "old", "", Value::Null);
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create("mid", "mid", "", Value::Null);
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create("new", "new", "", Value::Null);

        assert!(store.get("old").is_none());
        assert!(store.get("mid").is_some());
        assert!(store.get("new").is_some());
    }

    #[test]
    fn update_status_stamps_timestamps() {
        let store = store(None, 10);
        store.create("a", "demo", "", Value::Null);

        store.update_status("a", Status::Running, None);
        assert_eq!(store.get("a").unwrap().status, Status::Running);

        store.update_status("a", Status::Failed, Some("boom"));
        let record = store.get("a").unwrap();
        assert_eq!(record.status, Status::Failed);
        assert!(record.failed_at.is_some());
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn log_buffer_keeps_the_tail() {
        let store = store(None, 10);
        store.create("a", "demo", "", Value::Null);

        for i in 0..(MAX_LOG_ENTRIES + 5) {
            store.add_log("a", LogKind::Stdout, &format!("line {i}"));
        }

        let logs = store.get("a").unwrap().logs;
        assert_eq!(logs.len(), MAX_LOG_ENTRIES);
        assert_eq!(logs[0].message, "line 5");
        assert_eq!(logs.last().unwrap().message, format!("line {}", MAX_LOG_ENTRIES + 4));
    }

    #[test]
    fn mirrors_to_disk_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();

        let store_a = store(Some(path.clone()), 10);
        store_a.create("a", "demo", "name: demo", Value::Null);
        store_a.update_status("a", Status::Succeeded, None);

        assert!(path.join(".pipeline_records/a.json").exists());

        // A fresh store with an empty memory map falls back to disk.
        let store_b = store(Some(path.clone()), 10);
        let record = store_b.get("a").unwrap();
        assert_eq!(record.status, Status::Succeeded);

        assert!(store_b.delete("a"));
        assert!(!path.join(".pipeline_records/a.json").exists());
        assert!(!store_b.delete("a"));
    }
}
