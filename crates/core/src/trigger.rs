//! Static trigger descriptors.
//!
//! A [`TriggerDefinition`] is produced by the supervisor's static-analysis
//! pass and shipped to the harness through the loaded module. Resolution of a
//! definition to a callable handler lives in `stratus-runtime`; this module
//! only models the descriptor and its derived limits.

use serde::{Deserialize, Serialize};

/// Region assumed when a definition carries no region list.
pub const DEFAULT_REGION: &str = "central1";

/// Service identifier of the managed document database.
///
/// The one service whose background events still use the flattened legacy
/// record shape, and the only service the admin stub currently redirects.
pub const DOCSTORE_SERVICE: &str = "docstore.stratusapis.dev";

/// Domain under which all managed-backend services are hosted.
pub const MANAGED_API_DOMAIN: &str = "stratusapis.dev";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Memory tier a function may declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    /// 128 MB (the default tier).
    #[default]
    #[serde(rename = "128MB")]
    Mb128,
    /// 256 MB.
    #[serde(rename = "256MB")]
    Mb256,
    /// 512 MB.
    #[serde(rename = "512MB")]
    Mb512,
    /// 1 GB.
    #[serde(rename = "1GB")]
    Gb1,
    /// 2 GB.
    #[serde(rename = "2GB")]
    Gb2,
}

impl MemoryTier {
    /// Tier size in megabytes.
    #[must_use]
    pub fn megabytes(self) -> u64 {
        match self {
            Self::Mb128 => 128,
            Self::Mb256 => 256,
            Self::Mb512 => 512,
            Self::Gb1 => 1024,
            Self::Gb2 => 2048,
        }
    }

    /// Tier size in bytes.
    #[must_use]
    pub fn bytes(self) -> u64 {
        self.megabytes() * 1024 * 1024
    }
}

/// Declared invocation timeout.
///
/// Definitions written by hand carry the `"30s"` text form; tooling-generated
/// ones carry a bare integer of seconds. Both normalize through
/// [`as_millis`](Self::as_millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSpec {
    /// Whole seconds.
    Seconds(u64),
    /// Text form, `"<N>s"`.
    Text(String),
}

impl TimeoutSpec {
    /// The timeout in milliseconds.
    ///
    /// Unparseable text falls back to the 60-second default rather than
    /// failing the invocation.
    #[must_use]
    pub fn as_millis(&self) -> u64 {
        let seconds = match self {
            Self::Seconds(n) => *n,
            Self::Text(raw) => raw
                .trim_end_matches('s')
                .parse()
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        seconds * 1000
    }
}

/// An event-driven trigger's source description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTrigger {
    /// The resource whose changes fire this trigger.
    pub resource: String,
    /// Event type, `<service short name>/<event name>`.
    pub event_type: String,
    /// Full service identifier; derived from the event type when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl EventTrigger {
    /// The service this trigger listens to.
    #[must_use]
    pub fn service_id(&self) -> String {
        if let Some(service) = &self.service {
            return service.clone();
        }
        match self.event_type.split_once('/') {
            Some((short, _)) => format!("{short}.{MANAGED_API_DOMAIN}"),
            None => format!("{}.{MANAGED_API_DOMAIN}", self.event_type),
        }
    }
}

/// How the function is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerKind {
    /// Invoked by serving exactly one HTTP request.
    Https,
    /// Invoked directly with a decoded event payload.
    Event(EventTrigger),
}

/// Static descriptor of one deployable function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    /// Deployed name; the bundle's trigger id refers to this.
    pub name: String,
    /// Dotted path of the handler inside its module.
    pub entry_point: String,
    /// Invocation kind.
    pub kind: TriggerKind,
    /// Declared timeout; 60 seconds when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSpec>,
    /// Deployment regions; the first entry names the function's region.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    /// Declared memory tier; 128 MB when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_memory: Option<MemoryTier>,
}

impl TriggerDefinition {
    /// The invocation timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout
            .as_ref()
            .map_or(DEFAULT_TIMEOUT_SECS * 1000, TimeoutSpec::as_millis)
    }

    /// The resolved memory limit in bytes.
    #[must_use]
    pub fn memory_limit_bytes(&self) -> u64 {
        self.available_memory.unwrap_or_default().bytes()
    }

    /// The function's region.
    #[must_use]
    pub fn region(&self) -> &str {
        self.regions.first().map_or(DEFAULT_REGION, String::as_str)
    }

    /// Whether this is an HTTP-invoked function.
    #[must_use]
    pub fn is_https(&self) -> bool {
        matches!(self.kind, TriggerKind::Https)
    }

    /// The managed service an event trigger listens to, if any.
    #[must_use]
    pub fn service(&self) -> Option<String> {
        match &self.kind {
            TriggerKind::Https => None,
            TriggerKind::Event(event) => Some(event.service_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn definition(kind: TriggerKind) -> TriggerDefinition {
        TriggerDefinition {
            name: "onCreate".into(),
            entry_point: "onCreate".into(),
            kind,
            timeout: None,
            regions: vec![],
            available_memory: None,
        }
    }

    #[rstest]
    #[case(MemoryTier::Mb128, 134_217_728)]
    #[case(MemoryTier::Mb256, 268_435_456)]
    #[case(MemoryTier::Mb512, 536_870_912)]
    #[case(MemoryTier::Gb1, 1_073_741_824)]
    #[case(MemoryTier::Gb2, 2_147_483_648)]
    fn memory_tier_bytes(#[case] tier: MemoryTier, #[case] expected: u64) {
        assert_eq!(tier.bytes(), expected);
    }

    #[test]
    fn absent_memory_tier_defaults_to_smallest() {
        let def = definition(TriggerKind::Https);
        assert_eq!(def.memory_limit_bytes(), 134_217_728);
    }

    #[rstest]
    #[case(TimeoutSpec::Seconds(5), 5_000)]
    #[case(TimeoutSpec::Text("30s".into()), 30_000)]
    #[case(TimeoutSpec::Text("junk".into()), 60_000)]
    fn timeout_spec_millis(#[case] spec: TimeoutSpec, #[case] expected: u64) {
        assert_eq!(spec.as_millis(), expected);
    }

    #[test]
    fn absent_timeout_defaults_to_sixty_seconds() {
        let def = definition(TriggerKind::Https);
        assert_eq!(def.timeout_ms(), 60_000);
    }

    #[test]
    fn timeout_deserializes_from_both_forms() {
        let seconds: TimeoutSpec = serde_json::from_str("3").unwrap();
        assert_eq!(seconds, TimeoutSpec::Seconds(3));

        let text: TimeoutSpec = serde_json::from_str("\"3s\"").unwrap();
        assert_eq!(text, TimeoutSpec::Text("3s".into()));
    }

    #[test]
    fn region_defaults_when_list_is_empty() {
        let def = definition(TriggerKind::Https);
        assert_eq!(def.region(), DEFAULT_REGION);

        let mut regional = definition(TriggerKind::Https);
        regional.regions = vec!["east1".into(), "west2".into()];
        assert_eq!(regional.region(), "east1");
    }

    #[test]
    fn event_service_prefers_explicit_field() {
        let event = EventTrigger {
            resource: "projects/demo/documents/users/{id}".into(),
            event_type: "docstore/document.write".into(),
            service: Some("custom.example.com".into()),
        };
        assert_eq!(event.service_id(), "custom.example.com");
    }

    #[test]
    fn event_service_derives_from_event_type() {
        let event = EventTrigger {
            resource: "projects/demo/documents/users/{id}".into(),
            event_type: "docstore/document.write".into(),
            service: None,
        };
        assert_eq!(event.service_id(), DOCSTORE_SERVICE);
    }

    #[test]
    fn definition_round_trips_through_json() {
        let raw = r#"{
            "name": "onCreate",
            "entryPoint": "handlers.onCreate",
            "kind": {"type": "event", "resource": "users/{id}", "eventType": "docstore/document.create"},
            "timeout": "30s",
            "regions": ["central1"],
            "availableMemory": "256MB"
        }"#;
        let def: TriggerDefinition = serde_json::from_str(raw).unwrap();
        assert_eq!(def.entry_point, "handlers.onCreate");
        assert_eq!(def.timeout_ms(), 30_000);
        assert_eq!(def.memory_limit_bytes(), 268_435_456);
        assert_eq!(def.service().as_deref(), Some(DOCSTORE_SERVICE));
        assert!(!def.is_https());
    }
}
