//! The status-event reporter.
//!
//! Every event is serialized on its own and written as one line the instant
//! it is produced — no cross-event buffering, no acknowledgment. The
//! supervisor may only assume the line stream is ordered and append-only;
//! process termination can race the final flush, so an abrupt end with no
//! terminal summary event means a crash.

use std::io::Write;

use parking_lot::Mutex;

use stratus_core::event::{EventSink, StatusEvent};

/// Writes each event as one line, flushing immediately.
pub struct LineReporter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> LineReporter<W> {
    /// Report into an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the writer (used by tests to inspect the stream).
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl LineReporter<std::io::Stdout> {
    /// Report on stdout — the production channel to the supervisor.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for LineReporter<W> {
    fn emit(&self, event: &StatusEvent) {
        let line = match event.to_line() {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "dropping unserializable status event");
                return;
            }
        };
        let mut writer = self.writer.lock();
        // A failed write means the supervisor is gone; nothing useful left
        // to do but keep running to completion.
        if writeln!(writer, "{line}").is_err() || writer.flush().is_err() {
            tracing::warn!("status stream write failed");
        }
    }
}
