//! Admin SDK stubbing.
//!
//! The one stub that really matters: it rewrites the admin SDK's
//! app-initialization entry point so the developer's credentials are
//! discarded and a restricted local app is constructed instead, and it
//! intercepts the docstore accessor so the first touch lazily injects the
//! local emulator's connection settings. If the admin SDK ever reports a
//! default-credentials error, this stub failed to redirect and the SDK is
//! reaching for production.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};

use stratus_core::event::{EventSink, StatusEvent};

use crate::facade::{CallError, DynCallable as _, DynObject, Facade, HostFn, Member};

/// Name given to the stubbed default app.
pub const DEFAULT_APP_NAME: &str = "default";

/// What the stub needs to know about the invocation.
#[derive(Debug, Clone)]
pub struct AdminStubConfig {
    /// Project the invocation belongs to.
    pub project_id: String,
    /// Trigger being invoked, if any; used only to decide whether a missing
    /// emulator port deserves a warning.
    pub trigger_id: Option<String>,
    /// Local docstore emulator port, when one is running.
    pub docstore_port: Option<u16>,
    /// Whether settings injection is active. When off, developer settings
    /// calls pass straight through.
    pub stubs_enabled: bool,
    /// Platform config merged into every default app's options.
    pub platform_config: Value,
}

/// The restricted app instance the stub hands to user code.
///
/// Holds the merged options and the effective docstore settings. It never
/// carries credentials — that is the point.
pub struct LocalApp {
    name: String,
    options: Value,
    docstore_settings: Mutex<Value>,
}

impl LocalApp {
    fn new(name: impl Into<String>, options: Value) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            options,
            docstore_settings: Mutex::new(json!({})),
        })
    }

    /// The app's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The options the app was constructed with.
    #[must_use]
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// Snapshot of the effective docstore settings.
    #[must_use]
    pub fn docstore_settings(&self) -> Value {
        self.docstore_settings.lock().clone()
    }

    fn merge_settings(&self, incoming: &Value) {
        merge_into(&mut self.docstore_settings.lock(), incoming);
    }
}

impl DynObject for LocalApp {
    fn get(&self, key: &str) -> Option<Member> {
        match key {
            "name" => Some(Member::Value(json!(self.name))),
            "options" => Some(Member::Value(self.options.clone())),
            _ => None,
        }
    }
}

struct StubState {
    config: AdminStubConfig,
    sink: Arc<dyn EventSink>,
    app: Mutex<Option<Arc<LocalApp>>>,
    settings_finalized: Mutex<bool>,
}

/// Rewrites the admin SDK's initialization and settings surface.
///
/// A cheap handle; clones share the stubbed app and settings state.
#[derive(Clone)]
pub struct AdminStub {
    state: Arc<StubState>,
}

impl AdminStub {
    /// Create a stub for one invocation.
    pub fn new(config: AdminStubConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            state: Arc::new(StubState {
                config,
                sink,
                app: Mutex::new(None),
                settings_finalized: Mutex::new(false),
            }),
        }
    }

    /// The app user code initialized, if any.
    #[must_use]
    pub fn app(&self) -> Option<Arc<LocalApp>> {
        self.state.app.lock().clone()
    }

    /// Wrap the admin SDK namespace.
    ///
    /// Every member other than `initialize_app` and `docstore` behaves
    /// exactly as the unwrapped SDK.
    pub fn install(&self, sdk: Arc<dyn DynObject>) -> Arc<dyn DynObject> {
        let init_stub = self.clone();
        let docstore_stub = self.clone();
        Facade::wrap(sdk)
            .when("initialize_app", move |target, _key| {
                let stub = init_stub.clone();
                let target = Arc::clone(target);
                Member::Callable(HostFn::function(move |args| {
                    stub.initialize_app(&target, args)
                }))
            })
            .when("docstore", move |target, key| {
                docstore_stub.wrap_docstore_accessor(target, key)
            })
            .finalize()
    }

    fn initialize_app(&self, sdk: &Arc<dyn DynObject>, args: &[Value]) -> Result<Member, CallError> {
        let options = args.first().cloned().unwrap_or_else(|| json!({}));
        if let Some(app_name) = args.get(1).and_then(Value::as_str) {
            // Named apps are an escape hatch the stub leaves alone.
            self.state.sink.emit(
                &StatusEvent::system("non-default-app-used", "")
                    .with_data(json!({"appName": app_name})),
            );
            return match Facade::get_original(sdk, "initialize_app") {
                Some(original) => original.invoke(args),
                None => Err(CallError::NotCallable),
            };
        }

        self.state
            .sink
            .emit(&StatusEvent::system("default-app-used", ""));
        let mut merged = self.state.config.platform_config.clone();
        merge_into(&mut merged, &options);
        // Whatever credential the developer supplied must not survive into
        // the local app.
        if let Some(map) = merged.as_object_mut() {
            map.remove("credential");
        }
        let app = LocalApp::new(DEFAULT_APP_NAME, merged);
        *self.state.app.lock() = Some(Arc::clone(&app));
        Ok(Member::Object(app))
    }

    fn wrap_docstore_accessor(&self, sdk: &Arc<dyn DynObject>, key: &str) -> Member {
        let Some(accessor) = Facade::get_original(sdk, key).and_then(|m| m.as_object()) else {
            return Member::Value(Value::Null);
        };
        let stub = self.clone();
        let original = Arc::clone(&accessor);
        let wrapped = Facade::wrap(accessor)
            .applied(move |args| {
                let instance = match original.as_callable() {
                    Some(target) => target.call(args)?,
                    None => return Err(CallError::NotCallable),
                };
                let Some(instance) = instance.as_object() else {
                    return Err(CallError::Failed(
                        "docstore accessor returned a non-object".into(),
                    ));
                };
                Ok(Member::Object(stub.wrap_docstore_instance(instance)))
            })
            .finalize();
        Member::Object(wrapped)
    }

    fn wrap_docstore_instance(&self, instance: Arc<dyn DynObject>) -> Arc<Facade> {
        let settings_stub = self.clone();
        let touch_stub = self.clone();
        Facade::wrap(instance)
            .when("settings", move |_target, _key| {
                let stub = settings_stub.clone();
                Member::Callable(HostFn::function(move |args| {
                    stub.initialize_settings(args.first().cloned().unwrap_or_else(|| json!({})));
                    Ok(Member::Value(Value::Null))
                }))
            })
            .any(move |target, field| {
                touch_stub.initialize_settings(json!({}));
                Facade::get_original(target, field).unwrap_or(Member::Value(Value::Null))
            })
            .finalize()
    }

    fn initialize_settings(&self, user: Value) {
        let mut finalized = self.state.settings_finalized.lock();

        if !self.state.config.stubs_enabled {
            if !*finalized {
                self.apply_to_app(&user);
                *finalized = true;
            }
            return;
        }

        if *finalized {
            // Settings are already pinned to the emulator; later developer
            // calls merge on top instead of re-triggering injection.
            if user.as_object().is_some_and(|map| !map.is_empty()) {
                self.apply_to_app(&user);
            }
            return;
        }

        if let Some(port) = self.state.config.docstore_port {
            let mut settings = json!({
                "projectId": self.state.config.project_id,
                "host": "localhost",
                "port": port,
                "ssl": false,
                "credential": "insecure",
                "customHeaders": {"authorization": "Bearer owner"},
            });
            merge_into(&mut settings, &user);
            self.apply_to_app(&settings);
        } else if self.state.config.trigger_id.is_some() {
            self.state.sink.emit(&StatusEvent::warn(
                "runtime-status",
                "The docstore emulator is not running so database operations \
                 will fail with a credentials error.",
            ));
        }
        *finalized = true;
    }

    fn apply_to_app(&self, settings: &Value) {
        if let Some(app) = self.state.app.lock().as_ref() {
            app.merge_settings(settings);
        } else {
            tracing::debug!("docstore settings touched before any app was initialized");
        }
    }
}

/// Shallow merge of `incoming`'s top-level keys into `base`.
fn merge_into(base: &mut Value, incoming: &Value) {
    let (Some(base), Some(incoming)) = (base.as_object_mut(), incoming.as_object()) else {
        return;
    };
    for (key, value) in incoming {
        base.insert(key.clone(), value.clone());
    }
}
