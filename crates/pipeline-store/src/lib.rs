//! Run record storage.
//!
//! Records live in memory behind a read-biased lock and are mirrored to
//! `<workdir>/.pipeline_records/<id>.json` best-effort: disk problems are
//! warned, never surfaced. The mirror doubles as a fallback for records
//! evicted from memory.

pub mod record;
pub mod sink;
pub mod store;

pub use record::{LogEntry, LogKind, PipelineRecord};
pub use sink::LogSink;
pub use store::RecordStore;
