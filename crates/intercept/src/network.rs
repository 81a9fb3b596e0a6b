//! Outbound-transport interception.
//!
//! Wraps every entry point user code can reach to open an outbound
//! connection, classifies each destination the first time it is seen, and
//! forwards to the wrapped implementation. Entry points vary between being
//! plain functions and constructors across library versions, so a failed
//! plain invocation is silently retried as a constructor invocation.
//!
//! This is a helper, not an egress filter: code that conjures its own
//! sockets goes around it.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use url::Url;

use stratus_core::event::{EventSink, StatusEvent};
use stratus_core::trigger::MANAGED_API_DOMAIN;

use crate::facade::{CallError, DynCallable, Facade, HostFn, Member};

/// One outbound entry point to wrap.
pub struct TransportEntry {
    /// Transport family the entry point belongs to (e.g. `"http"`).
    pub module: String,
    /// Entry-point name within the family (e.g. `"request"`).
    pub entry: String,
    /// The unwrapped implementation.
    pub target: Arc<dyn DynCallable>,
    /// Whether this is the optional RPC gateway client library, whose
    /// constructed channels additionally get local-owner credentials.
    pub rpc_client: bool,
}

impl TransportEntry {
    /// A plain transport entry point.
    pub fn new(
        module: impl Into<String>,
        entry: impl Into<String>,
        target: Arc<dyn DynCallable>,
    ) -> Self {
        Self {
            module: module.into(),
            entry: entry.into(),
            target,
            rpc_client: false,
        }
    }

    /// Mark this entry as the RPC gateway client.
    #[must_use]
    pub fn rpc_client(mut self) -> Self {
        self.rpc_client = true;
        self
    }
}

/// Classifies and forwards outbound connection attempts.
///
/// Destinations are deduplicated for the process lifetime: the same
/// destination observed twice produces exactly one classification event.
/// The guard is a cheap handle; clones share the seen-set.
#[derive(Clone)]
pub struct NetworkGuard {
    sink: Arc<dyn EventSink>,
    seen: Arc<Mutex<HashSet<String>>>,
}

impl NetworkGuard {
    /// Create a guard emitting classification events into `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            seen: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wrap a set of transport entry points.
    ///
    /// Returns the wrapped callables keyed `"<module>.<entry>"`, ready to be
    /// reassembled into the transport namespace handed to user code.
    pub fn install(&self, entries: Vec<TransportEntry>) -> Vec<(String, Arc<dyn DynCallable>)> {
        let mut wrapped = Vec::with_capacity(entries.len());
        let mut report = Vec::with_capacity(entries.len());
        for entry in entries {
            let key = format!("{}.{}", entry.module, entry.entry);
            report.push(json!({"name": key, "status": "wrapped"}));
            wrapped.push((key, self.wrap_entry(entry)));
        }
        self.sink.emit(
            &StatusEvent::debug("runtime-status", "Outbound transports wrapped.")
                .with_data(Value::Array(report)),
        );
        wrapped
    }

    fn wrap_entry(&self, entry: TransportEntry) -> Arc<dyn DynCallable> {
        let guard = self.clone();
        let module = entry.module;
        let target = entry.target;
        let rpc_client = entry.rpc_client;
        HostFn::function(move |args| {
            guard.classify(&module, args);
            match target.call(args) {
                Ok(member) => Ok(member),
                // Some library versions expose this entry point as a
                // constructor; retry before giving up.
                Err(_) => {
                    let constructed = target.construct(args)?;
                    if rpc_client {
                        Ok(with_local_owner_credentials(constructed))
                    } else {
                        Ok(constructed)
                    }
                }
            }
        })
    }

    fn classify(&self, module: &str, args: &[Value]) {
        let Some(href) = first_destination(args) else {
            return;
        };
        if !self.seen.lock().insert(href.clone()) {
            return;
        }
        let data = json!({"href": href, "module": module});
        let event = if href.contains(MANAGED_API_DOMAIN) {
            StatusEvent::system("managed-network-access", "").with_data(data)
        } else {
            StatusEvent::system("unidentified-network-access", "").with_data(data)
        };
        self.sink.emit(&event);
    }
}

/// Pull the first recognizable destination out of a call's arguments:
/// either a string that parses as an absolute URL, or an object carrying
/// an `href` member.
fn first_destination(args: &[Value]) -> Option<String> {
    args.iter().find_map(|arg| match arg {
        Value::String(s) => Url::parse(s).ok().map(|_| s.clone()),
        Value::Object(map) => map
            .get("href")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        _ => None,
    })
}

/// Override the credential-construction method of a constructed RPC channel
/// so its calls authenticate as the local emulator owner.
fn with_local_owner_credentials(channel: Member) -> Member {
    let Some(object) = channel.as_object() else {
        return channel;
    };
    let wrapped = Facade::wrap(object)
        .when("construct_settings", |target, key| {
            let original = Facade::get_original(target, key);
            Member::Callable(HostFn::function(move |args| {
                let mut args = args.to_vec();
                while args.len() < 4 {
                    args.push(Value::Null);
                }
                if !args[3].is_object() {
                    args[3] = json!({});
                }
                args[3]["authorization"] = json!("Bearer owner");
                match &original {
                    Some(method) => method.invoke(&args),
                    None => Err(CallError::NotCallable),
                }
            }))
        })
        .finalize();
    Member::Object(wrapped)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stratus_core::event::CollectorSink;

    use crate::facade::Namespace;

    use super::*;

    fn forwarding_target() -> Arc<dyn DynCallable> {
        HostFn::function(|_args| Ok(Member::Value(json!("connected"))))
    }

    fn install_one(sink: &Arc<CollectorSink>, entry: TransportEntry) -> Arc<dyn DynCallable> {
        let guard = NetworkGuard::new(Arc::clone(sink) as Arc<dyn EventSink>);
        guard.install(vec![entry]).remove(0).1
    }

    #[test]
    fn managed_destination_is_classified_once() {
        let sink = Arc::new(CollectorSink::new());
        let request = install_one(
            &sink,
            TransportEntry::new("http", "request", forwarding_target()),
        );

        let href = json!("https://docstore.stratusapis.dev/v1/projects/demo");
        request.call(&[href.clone()]).unwrap();
        request.call(&[href]).unwrap();

        let events = sink.of_kind("managed-network-access");
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].data.as_ref().unwrap()["href"],
            "https://docstore.stratusapis.dev/v1/projects/demo"
        );
        assert!(sink.of_kind("unidentified-network-access").is_empty());
    }

    #[test]
    fn unknown_destination_is_classified_as_unidentified() {
        let sink = Arc::new(CollectorSink::new());
        let request = install_one(
            &sink,
            TransportEntry::new("https", "get", forwarding_target()),
        );

        request.call(&[json!("https://example.com/feed")]).unwrap();

        let events = sink.of_kind("unidentified-network-access");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data.as_ref().unwrap()["module"], "https");
    }

    #[test]
    fn destination_read_from_href_member() {
        let sink = Arc::new(CollectorSink::new());
        let request = install_one(
            &sink,
            TransportEntry::new("http", "request", forwarding_target()),
        );

        request
            .call(&[json!({"href": "https://example.com/x"})])
            .unwrap();

        assert_eq!(sink.of_kind("unidentified-network-access").len(), 1);
    }

    #[test]
    fn call_is_forwarded_unchanged() {
        let sink = Arc::new(CollectorSink::new());
        let request = install_one(
            &sink,
            TransportEntry::new("net", "connect", forwarding_target()),
        );

        let result = request.call(&[json!("https://example.com")]).unwrap();
        assert_eq!(result.as_value(), Some(&json!("connected")));
    }

    #[test]
    fn failed_plain_call_retries_as_constructor() {
        let sink = Arc::new(CollectorSink::new());
        let target = HostFn::constructor(|_args| Ok(Member::Value(json!("constructed"))));
        let request = install_one(&sink, TransportEntry::new("http", "request", target));

        let result = request.call(&[json!("https://example.com")]).unwrap();
        assert_eq!(result.as_value(), Some(&json!("constructed")));
    }

    #[test]
    fn rpc_channel_gets_owner_credentials() {
        let sink = Arc::new(CollectorSink::new());

        // A constructor-only channel whose construct_settings echoes the
        // options argument back, so the override is observable.
        let target = HostFn::constructor(|_args| {
            let channel = Namespace::new()
                .with_fn(
                    "construct_settings",
                    HostFn::function(|args| Ok(Member::Value(args[3].clone()))),
                )
                .build();
            Ok(Member::Object(channel))
        });
        let entry = TransportEntry::new("gateway", "channel", target).rpc_client();
        let wrapped = install_one(&sink, entry);

        let channel = wrapped
            .call(&[json!("https://docstore.stratusapis.dev")])
            .unwrap();
        let channel = channel.as_object().unwrap();
        let settings = channel
            .get("construct_settings")
            .unwrap()
            .invoke(&[json!("m"), json!({}), json!({}), json!({"retries": 3})])
            .unwrap();

        let options = settings.as_value().unwrap();
        assert_eq!(options["authorization"], "Bearer owner");
        assert_eq!(options["retries"], 3);
    }
}
