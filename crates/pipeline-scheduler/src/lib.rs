//! Pipeline admission scheduling.
//!
//! The queue bounds how many pipelines run at once and owns cancel
//! semantics; the worker loop polls it at ~1 Hz and runs each admitted
//! item in its own task.

pub mod queue;
pub mod worker;

pub use queue::{Dispatch, Queue, QueueItem, QueueStats};
pub use worker::Worker;
