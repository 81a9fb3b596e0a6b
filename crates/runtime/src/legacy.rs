//! Legacy event-shape conversion.
//!
//! The docstore service still consumes the flattened pre-1.0 event record.
//! Background dispatch converts the modern nested shape for that one
//! service; every other service's payload passes through byte-for-byte.

use serde_json::{Value, json};

use stratus_core::event::{EventSink, StatusEvent};
use stratus_core::trigger::DOCSTORE_SERVICE;

/// Whether a service consumes the legacy record shape.
#[must_use]
pub fn requires_legacy_shape(service: &str) -> bool {
    service == DOCSTORE_SERVICE
}

/// Whether a payload is the modern nested shape (`context` + `data`).
#[must_use]
pub fn is_structured_event(payload: &Value) -> bool {
    payload.get("context").is_some_and(Value::is_object) && payload.get("data").is_some()
}

/// Flatten a modern event into the legacy record.
#[must_use]
pub fn to_legacy(payload: &Value) -> Value {
    let context = &payload["context"];
    let resource = match &context["resource"] {
        Value::Object(resource) => resource.get("name").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    json!({
        "eventId": context["eventId"],
        "eventType": context["eventType"],
        "timestamp": context["timestamp"],
        "resource": resource,
        "data": payload["data"],
    })
}

/// Prepare a background payload for the target service.
pub fn prepare_payload(service: Option<&str>, payload: Value, sink: &dyn EventSink) -> Value {
    let Some(service) = service else {
        return payload;
    };
    if !requires_legacy_shape(service) {
        return payload;
    }
    if is_structured_event(&payload) {
        let legacy = to_legacy(&payload);
        sink.emit(&StatusEvent::debug(
            "runtime-status",
            format!(
                "[docstore] converting to the legacy event shape: old={payload}, new={legacy}"
            ),
        ));
        legacy
    } else {
        sink.emit(&StatusEvent::debug(
            "runtime-status",
            format!("[docstore] payload already in the legacy shape: {payload}"),
        ));
        payload
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stratus_core::event::CollectorSink;

    use super::*;

    fn modern() -> Value {
        json!({
            "context": {
                "eventId": "evt-1",
                "eventType": "docstore/document.create",
                "timestamp": "2024-05-01T12:00:00Z",
                "resource": {
                    "name": "projects/demo/documents/users/alice",
                    "service": DOCSTORE_SERVICE,
                },
            },
            "data": {"a": 1},
        })
    }

    #[test]
    fn modern_docstore_event_is_flattened() {
        let sink = CollectorSink::new();
        let converted = prepare_payload(Some(DOCSTORE_SERVICE), modern(), &sink);
        assert_eq!(converted["eventId"], "evt-1");
        assert_eq!(converted["eventType"], "docstore/document.create");
        assert_eq!(converted["resource"], "projects/demo/documents/users/alice");
        assert_eq!(converted["data"], json!({"a": 1}));
        assert!(converted.get("context").is_none());
    }

    #[test]
    fn legacy_docstore_payload_passes_through() {
        let sink = CollectorSink::new();
        let legacy = json!({"eventId": "evt-2", "data": {"b": 2}});
        let untouched = prepare_payload(Some(DOCSTORE_SERVICE), legacy.clone(), &sink);
        assert_eq!(untouched, legacy);
    }

    #[test]
    fn other_services_pass_through_unchanged() {
        let sink = CollectorSink::new();
        let payload = modern();
        let untouched = prepare_payload(Some("queue.stratusapis.dev"), payload.clone(), &sink);
        assert_eq!(untouched, payload);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn https_triggers_have_no_service() {
        let sink = CollectorSink::new();
        let payload = json!({"anything": true});
        assert_eq!(prepare_payload(None, payload.clone(), &sink), payload);
    }
}
