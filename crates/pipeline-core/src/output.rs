//! Output sinks.
//!
//! A step's stdout/stderr is an append-bytes capability, not a full
//! `io::Write`. The service layers a tee on top to forward frames on the
//! connection while appending to the record store's log buffer.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Append-only byte sink for a run's stdout or stderr stream.
pub trait OutputSink: Send + Sync {
    fn append(&self, chunk: &[u8]);

    /// Append a progress line, newline-terminated.
    fn append_line(&self, line: &str) {
        self.append(line.as_bytes());
        self.append(b"\n");
    }
}

impl fmt::Debug for dyn OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn OutputSink")
    }
}

pub type SharedSink = Arc<dyn OutputSink>;

/// The stdout/stderr sink pair handed down the execution tree.
#[derive(Clone)]
pub struct RunIo {
    pub stdout: SharedSink,
    pub stderr: SharedSink,
}

impl RunIo {
    pub fn stdout() -> Self {
        let out: SharedSink = Arc::new(StdoutSink);
        Self {
            stdout: out.clone(),
            stderr: out,
        }
    }
}

/// Writes to the process stdout, best-effort.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn append(&self, chunk: &[u8]) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(chunk);
        let _ = out.flush();
    }
}

/// Discards everything.
pub struct NullSink;

impl OutputSink for NullSink {
    fn append(&self, _chunk: &[u8]) {}
}

/// Fans a chunk out to every inner sink in order.
pub struct TeeSink {
    sinks: Vec<SharedSink>,
}

impl TeeSink {
    pub fn new(sinks: Vec<SharedSink>) -> Self {
        Self { sinks }
    }
}

impl OutputSink for TeeSink {
    fn append(&self, chunk: &[u8]) {
        for sink in &self.sinks {
            sink.append(chunk);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Captures appended bytes for assertions.
    #[derive(Default)]
    pub struct CaptureSink {
        buf: Mutex<Vec<u8>>,
    }

    impl CaptureSink {
        pub fn contents(&self) -> String {
            String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
        }
    }

    impl OutputSink for CaptureSink {
        fn append(&self, chunk: &[u8]) {
            self.buf.lock().unwrap().extend_from_slice(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::CaptureSink;
    use super::*;

    #[test]
    fn tee_fans_out_in_order() {
        let a = Arc::new(CaptureSink::default());
        let b = Arc::new(CaptureSink::default());
        let tee = TeeSink::new(vec![a.clone() as SharedSink, b.clone() as SharedSink]);

        tee.append_line("hello");
        assert_eq!(a.contents(), "hello\n");
        assert_eq!(b.contents(), "hello\n");
    }
}
