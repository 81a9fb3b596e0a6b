//! Runtime-config lookup proxy.
//!
//! Functions read deploy-time configuration as two-level `section.key`
//! lookups. Locally there is usually no deployed config at all, and a
//! missing key would otherwise take the whole invocation down before the
//! handler gets a chance to run. The proxy softens that: present values
//! pass through unchanged, missing ones resolve to null and emit one
//! diagnostic event naming the dotted path.

use std::sync::Arc;

use serde_json::{Value, json};

use stratus_core::event::{EventSink, StatusEvent};

use crate::facade::{DynObject, Facade, Member, Namespace};

/// Wrap a config surface so missing keys are survivable.
pub fn wrap_config(original: Arc<dyn DynObject>, sink: Arc<dyn EventSink>) -> Arc<dyn DynObject> {
    Facade::wrap(original)
        .any(move |target, section_key| {
            let section = Facade::get_original(target, section_key)
                .and_then(|m| m.as_object())
                .unwrap_or_else(|| Namespace::new().build());
            Member::Object(wrap_section(section, section_key, Arc::clone(&sink)))
        })
        .finalize()
}

fn wrap_section(
    section: Arc<dyn DynObject>,
    section_key: &str,
    sink: Arc<dyn EventSink>,
) -> Arc<dyn DynObject> {
    let section_key = section_key.to_owned();
    Facade::wrap(section)
        .any(move |target, key| {
            match Facade::get_original(target, key) {
                Some(Member::Value(Value::Null)) | None => {
                    let path = format!("{section_key}.{key}");
                    sink.emit(
                        &StatusEvent::system("config-missing-value", "")
                            .with_data(json!({"valuePath": path})),
                    );
                    Member::Value(Value::Null)
                }
                Some(member) => member,
            }
        })
        .finalize()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stratus_core::event::CollectorSink;

    use super::*;

    fn deployed_config() -> Arc<dyn DynObject> {
        let service = Namespace::new()
            .with_value("key", json!("s3cr3t"))
            .build();
        Namespace::new().with_object("service", service).build()
    }

    #[test]
    fn present_values_pass_through() {
        let sink = Arc::new(CollectorSink::new());
        let config = wrap_config(deployed_config(), Arc::clone(&sink) as Arc<dyn EventSink>);

        let value = config
            .get("service")
            .unwrap()
            .as_object()
            .unwrap()
            .get("key")
            .unwrap();

        assert_eq!(value.as_value(), Some(&json!("s3cr3t")));
        assert!(sink.of_kind("config-missing-value").is_empty());
    }

    #[test]
    fn missing_leaf_resolves_to_null_with_diagnostic() {
        let sink = Arc::new(CollectorSink::new());
        let config = wrap_config(deployed_config(), Arc::clone(&sink) as Arc<dyn EventSink>);

        let value = config
            .get("service")
            .unwrap()
            .as_object()
            .unwrap()
            .get("missing")
            .unwrap();

        assert_eq!(value.as_value(), Some(&Value::Null));
        let events = sink.of_kind("config-missing-value");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_ref().unwrap()["valuePath"], "service.missing");
    }

    #[test]
    fn missing_section_resolves_leaves_to_null() {
        let sink = Arc::new(CollectorSink::new());
        let config = wrap_config(deployed_config(), Arc::clone(&sink) as Arc<dyn EventSink>);

        let value = config
            .get("absent")
            .unwrap()
            .as_object()
            .unwrap()
            .get("leaf")
            .unwrap();

        assert_eq!(value.as_value(), Some(&Value::Null));
        assert_eq!(
            sink.of_kind("config-missing-value")[0].data.as_ref().unwrap()["valuePath"],
            "absent.leaf"
        );
    }
}
