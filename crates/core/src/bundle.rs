//! Invocation bundle decoding.
//!
//! The supervising emulator server serializes one [`InvocationBundle`] per
//! spawned harness process. The bundle is decoded once at startup and never
//! mutated afterwards; every later stage borrows it.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::SetupError;

/// Runtime features the supervisor may switch off for one invocation.
///
/// Every feature defaults to *enabled*; the bundle carries only the disabled
/// set. The wire names are stable — they are part of the supervisor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Missing runtime-config keys resolve to null with a diagnostic event
    /// instead of failing the lookup.
    FunctionsConfigHelper,
    /// Outbound transport entry points are wrapped and classified.
    NetworkFiltering,
    /// The invocation watchdog is armed with the trigger's timeout.
    Timeout,
    /// The resolved memory tier is enforced (enforcement lives outside the
    /// harness; the flag is carried for the supervisor's benefit).
    MemoryLimiting,
    /// Credential-discovery state is cleared before user code can observe it.
    ProtectEnv,
    /// The admin SDK's initialization and settings entry points are stubbed
    /// to target local emulators.
    AdminStubs,
}

/// Local ports of the emulated backend services, keyed by service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmulatedPorts {
    /// Port of the local docstore emulator, when one is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docstore: Option<u16>,
}

/// Immutable description of one invocation.
///
/// Exactly one bundle exists per harness process. A bundle without a
/// [`trigger_id`](Self::trigger_id) is a pure load/compile diagnostic: the
/// harness loads the module, reports what it found, and exits without
/// invoking anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationBundle {
    /// The developer project this invocation belongs to.
    pub project_id: String,
    /// Working directory of the developer's functions project.
    pub cwd: PathBuf,
    /// Name of the trigger to invoke, if any.
    pub trigger_id: Option<String>,
    /// Decoded event payload for background triggers.
    pub payload: Option<serde_json::Value>,
    /// Ports of the local emulators the stubs redirect to.
    pub ports: EmulatedPorts,
    /// Features the supervisor disabled for this invocation.
    pub disabled_features: HashSet<Feature>,
}

impl Default for InvocationBundle {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            cwd: PathBuf::from("."),
            trigger_id: None,
            payload: None,
            ports: EmulatedPorts::default(),
            disabled_features: HashSet::new(),
        }
    }
}

impl InvocationBundle {
    /// Decode a bundle from the serialized form the supervisor passes on the
    /// command line.
    pub fn decode(raw: &str) -> Result<Self, SetupError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Whether a feature is enabled for this invocation.
    ///
    /// Features are enabled unless the bundle explicitly disabled them.
    #[must_use]
    pub fn feature_enabled(&self, feature: Feature) -> bool {
        !self.disabled_features.contains(&feature)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_bundle_decodes_with_defaults() {
        let bundle = InvocationBundle::decode("{}").unwrap();
        assert_eq!(bundle.project_id, "");
        assert_eq!(bundle.cwd, PathBuf::from("."));
        assert!(bundle.trigger_id.is_none());
        assert!(bundle.payload.is_none());
        assert!(bundle.ports.docstore.is_none());
    }

    #[test]
    fn full_bundle_decodes() {
        let raw = r#"{
            "projectId": "demo",
            "cwd": "/srv/functions",
            "triggerId": "onCreate",
            "payload": {"data": {"a": 1}},
            "ports": {"docstore": 8080},
            "disabledFeatures": ["timeout", "network_filtering"]
        }"#;
        let bundle = InvocationBundle::decode(raw).unwrap();
        assert_eq!(bundle.project_id, "demo");
        assert_eq!(bundle.trigger_id.as_deref(), Some("onCreate"));
        assert_eq!(bundle.ports.docstore, Some(8080));
        assert!(!bundle.feature_enabled(Feature::Timeout));
        assert!(!bundle.feature_enabled(Feature::NetworkFiltering));
    }

    #[test]
    fn features_default_to_enabled() {
        let bundle = InvocationBundle::default();
        for feature in [
            Feature::FunctionsConfigHelper,
            Feature::NetworkFiltering,
            Feature::Timeout,
            Feature::MemoryLimiting,
            Feature::ProtectEnv,
            Feature::AdminStubs,
        ] {
            assert!(bundle.feature_enabled(feature));
        }
    }

    #[test]
    fn malformed_bundle_is_a_setup_error() {
        let err = InvocationBundle::decode("not json").unwrap_err();
        assert!(matches!(err, SetupError::MalformedBundle(_)));
    }
}
