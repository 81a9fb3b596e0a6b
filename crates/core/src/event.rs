//! Structured status events.
//!
//! The event stream is the only harness → supervisor channel. Events are
//! emitted eagerly, serialized independently, and written one per line; the
//! supervisor treats the stream as ordered and append-only. Sinks receive
//! events through [`EventSink`] so every component can emit without knowing
//! where the stream ends up.

use serde::{Deserialize, Serialize};

/// Severity and audience of a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    /// Internal diagnostics, hidden from the developer by default.
    Debug,
    /// Informational progress the supervisor may surface.
    Info,
    /// Something is off but the invocation continues.
    Warn,
    /// Machine-readable lifecycle events the supervisor acts on.
    System,
    /// Output of the developer's own logging.
    User,
    /// The invocation cannot continue.
    Fatal,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::System => write!(f, "SYSTEM"),
            Self::User => write!(f, "USER"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// One record in the status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Severity and audience.
    pub level: Level,
    /// Stable event type the supervisor switches on.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message; may be empty for purely structured events.
    pub message: String,
    /// Structured payload, when the event carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl StatusEvent {
    /// Create an event at an explicit level.
    pub fn new(level: Level, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            kind: kind.into(),
            message: message.into(),
            data: None,
        }
    }

    /// A `DEBUG` event.
    pub fn debug(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Debug, kind, message)
    }

    /// An `INFO` event.
    pub fn info(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Info, kind, message)
    }

    /// A `WARN` event.
    pub fn warn(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Warn, kind, message)
    }

    /// A `SYSTEM` event.
    pub fn system(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::System, kind, message)
    }

    /// A `USER` event.
    pub fn user(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::User, kind, message)
    }

    /// A `FATAL` event.
    pub fn fatal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::Fatal, kind, message)
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to the single-line wire form.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receives status events the instant they are produced.
///
/// Implementations must not buffer across events — the supervisor relies on
/// seeing each event as soon as the producing code emits it.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: &StatusEvent);
}

/// Discards every event. Useful for embedders that only want return values.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &StatusEvent) {}
}

/// Collects events in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: parking_lot::Mutex<Vec<StatusEvent>>,
}

impl CollectorSink {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind, in emission order.
    #[must_use]
    pub fn of_kind(&self, kind: &str) -> Vec<StatusEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Events at one level, in emission order.
    #[must_use]
    pub fn at_level(&self, level: Level) -> Vec<StatusEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: &StatusEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn wire_form_is_one_json_object() {
        let line = StatusEvent::system("runtime-status", "ready")
            .with_data(serde_json::json!({"socket": "/tmp/x.sock"}))
            .to_line()
            .unwrap();
        assert!(!line.contains('\n'));

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "SYSTEM");
        assert_eq!(parsed["type"], "runtime-status");
        assert_eq!(parsed["message"], "ready");
        assert_eq!(parsed["data"]["socket"], "/tmp/x.sock");
    }

    #[test]
    fn data_is_omitted_when_absent() {
        let line = StatusEvent::debug("runtime-status", "booting")
            .to_line()
            .unwrap();
        assert!(!line.contains("\"data\""));
    }

    #[test]
    fn collector_preserves_emission_order() {
        let sink = CollectorSink::new();
        sink.emit(&StatusEvent::debug("runtime-status", "first"));
        sink.emit(&StatusEvent::fatal("runtime-error", "second"));

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "first");
        assert_eq!(events[1].message, "second");
        assert_eq!(sink.at_level(Level::Fatal).len(), 1);
        assert_eq!(sink.of_kind("runtime-status").len(), 1);
    }
}
