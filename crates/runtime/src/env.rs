//! Invocation environment.
//!
//! Everything the original deployment environment would have provided
//! through ambient variables lives in one [`EnvContext`], constructed once
//! before the module loads and passed by reference to every consumer. The
//! credential-gating decision happens here and nowhere else.

use std::sync::Arc;

use serde_json::{Value, json};

use stratus_core::bundle::{EmulatedPorts, InvocationBundle};

/// Environment variable carrying a path to discoverable credentials.
pub const CREDENTIALS_VAR: &str = "STRATUS_APPLICATION_CREDENTIALS";

/// Environment variable overriding the derived database URL.
pub const DATABASE_URL_VAR: &str = "STRATUS_DATABASE_URL";

/// Environment variable overriding the derived storage bucket.
pub const STORAGE_BUCKET_VAR: &str = "STRATUS_STORAGE_BUCKET";

/// Immutable per-invocation environment.
#[derive(Debug, Clone)]
pub struct EnvContext {
    project_id: String,
    database_url: String,
    storage_bucket: String,
    application_credentials: Option<String>,
    ports: EmulatedPorts,
}

impl EnvContext {
    /// Build the environment for one invocation.
    ///
    /// With `protect_credentials` set, any discoverable credential path is
    /// dropped so nothing can silently authenticate against production when
    /// a stub fails to redirect.
    pub fn prepare(bundle: &InvocationBundle, protect_credentials: bool) -> Arc<Self> {
        let project_id = bundle.project_id.clone();
        let database_url = std::env::var(DATABASE_URL_VAR)
            .unwrap_or_else(|_| format!("https://{project_id}.db.stratusapis.dev"));
        let storage_bucket = std::env::var(STORAGE_BUCKET_VAR)
            .unwrap_or_else(|_| format!("{project_id}.store.stratusapis.dev"));
        let application_credentials = if protect_credentials {
            None
        } else {
            std::env::var(CREDENTIALS_VAR).ok()
        };
        Arc::new(Self {
            project_id,
            database_url,
            storage_bucket,
            application_credentials,
            ports: bundle.ports,
        })
    }

    /// The invocation's project id.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Discoverable credential path, unless gated away.
    #[must_use]
    pub fn application_credentials(&self) -> Option<&str> {
        self.application_credentials.as_deref()
    }

    /// Local emulator ports.
    #[must_use]
    pub fn ports(&self) -> EmulatedPorts {
        self.ports
    }

    /// Whether this environment is an emulation (always true in the harness).
    #[must_use]
    pub fn emulated(&self) -> bool {
        true
    }

    /// The platform config the SDK would have derived in deployment.
    #[must_use]
    pub fn platform_config(&self) -> Value {
        json!({
            "projectId": self.project_id,
            "databaseUrl": self.database_url,
            "storageBucket": self.storage_bucket,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bundle() -> InvocationBundle {
        InvocationBundle {
            project_id: "demo".into(),
            ..InvocationBundle::default()
        }
    }

    #[test]
    fn platform_config_derives_from_project_id() {
        let env = EnvContext::prepare(&bundle(), true);
        let config = env.platform_config();
        assert_eq!(config["projectId"], "demo");
        assert_eq!(config["databaseUrl"], "https://demo.db.stratusapis.dev");
        assert_eq!(config["storageBucket"], "demo.store.stratusapis.dev");
    }

    #[test]
    fn protected_environment_carries_no_credentials() {
        // Whatever the surrounding process env holds, gating must win.
        let env = EnvContext::prepare(&bundle(), true);
        assert!(env.application_credentials().is_none());
    }
}
