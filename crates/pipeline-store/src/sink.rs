//! Store-backed output sink.

use std::sync::Arc;

use pipeline_core::OutputSink;

use crate::record::LogKind;
use crate::store::RecordStore;

/// Forwards output chunks into a record's log buffer.
pub struct LogSink {
    store: Arc<RecordStore>,
    id: String,
    kind: LogKind,
}

impl LogSink {
    pub fn new(store: Arc<RecordStore>, id: impl Into<String>, kind: LogKind) -> Self {
        Self {
            store,
            id: id.into(),
            kind,
        }
    }
}

impl OutputSink for LogSink {
    fn append(&self, chunk: &[u8]) {
        self.store
            .add_log(&self.id, self.kind, &String::from_utf8_lossy(chunk));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn appends_chunks_as_log_entries() {
        let store = Arc::new(RecordStore::new(None, 10));
        store.create("a", "demo", "", Value::Null);

        let sink = LogSink::new(store.clone(), "a", LogKind::Stderr);
        sink.append(b"oops\n");

        let logs = store.get("a").unwrap().logs;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind, LogKind::Stderr);
        assert_eq!(logs[0].message, "oops\n");
    }
}
