//! Harness-provided SDK surfaces.
//!
//! In deployment the SDK crates bind to the real platform; inside the
//! harness the surface user code sees is assembled here and wrapped by the
//! interception layer before a module ever touches it. The base objects are
//! local stand-ins — the harness implements no backend — but they preserve
//! the shape the SDK exposes, so wrapped and unwrapped members resolve the
//! same way they would in deployment.

use std::sync::Arc;

use serde_json::{Value, json};

use stratus_core::bundle::{Feature, InvocationBundle};
use stratus_core::event::{EventSink, StatusEvent};
use stratus_intercept::admin::{AdminStub, AdminStubConfig};
use stratus_intercept::config::wrap_config;
use stratus_intercept::facade::{DynCallable, DynObject, HostFn, JsonObject, Member, Namespace};
use stratus_intercept::network::{NetworkGuard, TransportEntry};

use crate::env::EnvContext;
use crate::verify::{RPC_CLIENT_CRATE, locked_version};

/// File the deployed runtime config is mirrored into for local runs.
pub const RUNTIME_CONFIG_FILE: &str = ".runtimeconfig.json";

/// The installed interception surfaces for one invocation.
pub struct SdkHarness {
    /// The stub behind the admin surface, for app-state queries.
    pub admin_stub: AdminStub,
    /// The wrapped admin SDK namespace.
    pub admin: Arc<dyn DynObject>,
    /// The runtime-config surface.
    pub config: Arc<dyn DynObject>,
    /// The outbound transport namespace.
    pub transports: Arc<dyn DynObject>,
}

impl SdkHarness {
    /// Build and wrap every SDK surface for this invocation.
    pub fn install(
        bundle: &InvocationBundle,
        env: &Arc<EnvContext>,
        sink: &Arc<dyn EventSink>,
    ) -> Self {
        let admin_stub = AdminStub::new(
            AdminStubConfig {
                project_id: bundle.project_id.clone(),
                trigger_id: bundle.trigger_id.clone(),
                docstore_port: bundle.ports.docstore,
                stubs_enabled: bundle.feature_enabled(Feature::AdminStubs),
                platform_config: env.platform_config(),
            },
            Arc::clone(sink),
        );
        let admin = admin_stub.install(admin_namespace(env));
        sink.emit(&StatusEvent::debug(
            "runtime-status",
            "Admin SDK surface wrapped.",
        ));

        let config_base = JsonObject::new(load_runtime_config(bundle, sink));
        let config = if bundle.feature_enabled(Feature::FunctionsConfigHelper) {
            wrap_config(config_base, Arc::clone(sink))
        } else {
            config_base
        };

        let transports = build_transports(bundle, sink);

        Self {
            admin_stub,
            admin,
            config,
            transports,
        }
    }

    /// Initialize the default app if user code never did.
    ///
    /// Managed-backend access has to work even for functions that assume
    /// the deployed runtime initialized the SDK for them.
    pub fn ensure_default_app(&self, sink: &Arc<dyn EventSink>) {
        if self.admin_stub.app().is_some() {
            return;
        }
        if let Some(init) = self.admin.get("initialize_app")
            && let Err(err) = init.invoke(&[])
        {
            tracing::warn!(error = %err, "default app auto-initialization failed");
        }
        sink.emit(&StatusEvent::system("admin-auto-initialized", ""));
    }
}

/// The unwrapped admin SDK namespace.
///
/// `initialize_app` here is the production path the stub protects against:
/// it keeps whatever options (and credentials) it is given.
fn admin_namespace(env: &Arc<EnvContext>) -> Arc<dyn DynObject> {
    let platform_config = env.platform_config();
    let instance = docstore_instance();
    let accessor = Namespace::new()
        .callable(HostFn::function(move |_args| {
            Ok(Member::Object(Arc::clone(&instance)))
        }))
        .build();
    Namespace::new()
        .with_fn(
            "initialize_app",
            HostFn::function(move |args| {
                let mut options = platform_config.clone();
                if let (Some(base), Some(incoming)) =
                    (options.as_object_mut(), args.first().and_then(Value::as_object))
                {
                    for (key, value) in incoming {
                        base.insert(key.clone(), value.clone());
                    }
                }
                Ok(Member::Object(
                    Namespace::new()
                        .with_value("name", json!("default"))
                        .with_value("options", options)
                        .build(),
                ))
            }),
        )
        .with_object("docstore", accessor)
        .build()
}

/// The unwrapped docstore client: descriptive local stand-ins, no backend.
fn docstore_instance() -> Arc<dyn DynObject> {
    Namespace::new()
        .with_fn(
            "collection",
            HostFn::function(|args| {
                let path = args.first().cloned().unwrap_or(Value::Null);
                Ok(Member::Object(
                    Namespace::new().with_value("path", path).build(),
                ))
            }),
        )
        .build()
}

/// Mirror of the deployed runtime config, when the project carries one.
fn load_runtime_config(bundle: &InvocationBundle, sink: &Arc<dyn EventSink>) -> Value {
    let config = std::fs::read_to_string(bundle.cwd.join(RUNTIME_CONFIG_FILE))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| json!({}));
    sink.emit(
        &StatusEvent::debug("runtime-status", "Checked runtime config.")
            .with_data(json!({"config": &config})),
    );
    config
}

fn base_connector(label: &str) -> Arc<dyn DynCallable> {
    let label = label.to_owned();
    HostFn::function(move |_args| {
        Ok(Member::Value(
            json!({"transport": label, "status": "open"}),
        ))
    })
}

/// The RPC gateway channel stand-in: constructor-only, with a
/// `construct_settings` method that echoes the effective call options.
fn base_rpc_channel() -> Arc<dyn DynCallable> {
    HostFn::constructor(|_args| {
        Ok(Member::Object(
            Namespace::new()
                .with_fn(
                    "construct_settings",
                    HostFn::function(|args| {
                        Ok(Member::Value(args.get(3).cloned().unwrap_or(Value::Null)))
                    }),
                )
                .build(),
        ))
    })
}

/// Assemble the transport namespace, wrapping entries through the network
/// guard when filtering is enabled.
fn build_transports(bundle: &InvocationBundle, sink: &Arc<dyn EventSink>) -> Arc<dyn DynObject> {
    let mut entries = vec![
        TransportEntry::new("http", "request", base_connector("http.request")),
        TransportEntry::new("http", "get", base_connector("http.get")),
        TransportEntry::new("https", "request", base_connector("https.request")),
        TransportEntry::new("https", "get", base_connector("https.get")),
        TransportEntry::new("net", "connect", base_connector("net.connect")),
    ];

    // The RPC gateway client only exists in projects whose SDK version
    // still pulls it in; detect it from the lockfile.
    match locked_version(&bundle.cwd, RPC_CLIENT_CRATE) {
        Some(version) => {
            sink.emit(&StatusEvent::debug(
                "runtime-status",
                format!("Found {RPC_CLIENT_CRATE} {version} in the project lockfile."),
            ));
            entries.push(TransportEntry::new("gateway", "channel", base_rpc_channel()).rpc_client());
        }
        None => {
            sink.emit(&StatusEvent::debug(
                "runtime-status",
                format!(
                    "Couldn't find {RPC_CLIENT_CRATE}; this is expected with newer admin SDKs."
                ),
            ));
        }
    }

    let wrapped: Vec<(String, Arc<dyn DynCallable>)> =
        if bundle.feature_enabled(Feature::NetworkFiltering) {
            NetworkGuard::new(Arc::clone(sink)).install(entries)
        } else {
            entries
                .into_iter()
                .map(|entry| (format!("{}.{}", entry.module, entry.entry), entry.target))
                .collect()
        };

    assemble_namespace(wrapped)
}

/// Group `"<module>.<entry>"` callables into nested namespaces.
fn assemble_namespace(entries: Vec<(String, Arc<dyn DynCallable>)>) -> Arc<dyn DynObject> {
    let mut modules: std::collections::BTreeMap<String, Vec<(String, Arc<dyn DynCallable>)>> =
        std::collections::BTreeMap::new();
    for (key, callable) in entries {
        let (module, entry) = key.split_once('.').unwrap_or((key.as_str(), "call"));
        modules
            .entry(module.to_owned())
            .or_default()
            .push((entry.to_owned(), callable));
    }

    let mut root = Namespace::new();
    for (module, callables) in modules {
        let mut namespace = Namespace::new();
        for (entry, callable) in callables {
            namespace = namespace.with_fn(entry, callable);
        }
        root = root.with_object(module, namespace.build());
    }
    root.build()
}
