#![allow(unsafe_code, reason = "FFI calls for dynamic module loading")]

//! Module loading and trigger resolution.
//!
//! A functions module is a shared library built from the developer's project,
//! exporting a `create_module` symbol. The loader resolves it either from the
//! project's working directory or from an inline-provided unit shipped by the
//! supervisor; both go through the same library-loading path — there is no
//! generic evaluator.
//!
//! When the module cannot be loaded at all, [`resolution_detective`] inspects
//! the project for the usual suspects and reports them as hints, not resolved
//! errors.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(feature = "dynamic-loading")]
use base64::Engine as _;
#[cfg(feature = "dynamic-loading")]
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use stratus_core::error::ResolutionError;
use stratus_core::event::{EventSink, StatusEvent};
use stratus_core::trigger::TriggerDefinition;

use crate::module::{FunctionsModule, Handler};

/// Symbol every functions module must export.
pub const CREATE_MODULE_SYMBOL: &[u8] = b"create_module";

/// Errors from the module-loading layer.
#[derive(Debug, Error)]
pub enum ModuleLoadError {
    /// No built module artifact was found for the project.
    #[error("no built module artifact found under {dir}")]
    Artifact {
        /// The project directory that was searched.
        dir: String,
    },

    /// The library file failed to open.
    #[error("failed to load module library '{path}': {reason}")]
    Load {
        /// Path of the library file.
        path: String,
        /// The underlying error message.
        reason: String,
    },

    /// The `create_module` symbol was not found in the library.
    #[error("symbol 'create_module' not found in '{path}': {reason}")]
    SymbolNotFound {
        /// Path of the library file.
        path: String,
        /// The underlying error message.
        reason: String,
    },

    /// A panic occurred inside the loaded library.
    #[error("panic occurred while loading module from '{0}'")]
    Panic(String),

    /// The inline unit payload was malformed.
    #[error("invalid inline module unit: {reason}")]
    InlineUnit {
        /// What was wrong with the payload.
        reason: String,
    },
}

/// Produces the functions module for one invocation.
pub trait ModuleProvider: Send + Sync {
    /// Load the module.
    fn load(&self) -> Result<Arc<dyn FunctionsModule>, ModuleLoadError>;
}

/// Platform-specific shared-library file name for a crate name.
fn library_file_name(crate_name: &str) -> String {
    let stem = crate_name.replace('-', "_");
    if cfg!(target_os = "windows") {
        format!("{stem}.dll")
    } else if cfg!(target_os = "macos") {
        format!("lib{stem}.dylib")
    } else {
        format!("lib{stem}.so")
    }
}

/// Locate the project's built module artifact, if any.
///
/// Reads the crate name from the project manifest and looks for the built
/// library under `target/debug` and `target/release`, in that order.
#[must_use]
pub fn module_artifact(cwd: &Path) -> Option<PathBuf> {
    let raw = std::fs::read_to_string(cwd.join("Cargo.toml")).ok()?;
    let manifest: toml::Value = toml::from_str(&raw).ok()?;
    let name = manifest
        .get("lib")
        .and_then(|lib| lib.get("name"))
        .or_else(|| manifest.get("package")?.get("name"))
        .and_then(toml::Value::as_str)?;
    let file_name = library_file_name(name);
    ["debug", "release"]
        .iter()
        .map(|profile| cwd.join("target").join(profile).join(&file_name))
        .find(|path| path.exists())
}

/// Inspect a project whose module failed to load and report hints.
///
/// A manifest with no built artifact suggests the project was never compiled;
/// a missing manifest suggests the harness was pointed at the wrong
/// directory. The findings are hints for the supervisor to render, not
/// resolved errors.
pub fn resolution_detective(cwd: &Path, error: &str, sink: &dyn EventSink) {
    let manifest_present = cwd.join("Cargo.toml").exists();
    let artifact_present = module_artifact(cwd).is_some();
    sink.emit(
        &StatusEvent::system("module-resolution-failed", "").with_data(json!({
            "isPotentially": {
                "uncompiled": manifest_present && !artifact_present,
                "wrongDirectory": !manifest_present,
            },
            "error": error,
        })),
    );
}

#[cfg(feature = "dynamic-loading")]
fn load_module_library(
    path: &Path,
) -> Result<(libloading::Library, Arc<dyn FunctionsModule>), ModuleLoadError> {
    let display = path.display().to_string();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: we trust the module to export `create_module` with the
        // expected ABI; it is built against this crate's module interface.
        unsafe {
            let library =
                libloading::Library::new(path).map_err(|e| ModuleLoadError::Load {
                    path: display.clone(),
                    reason: e.to_string(),
                })?;

            let create: libloading::Symbol<'_, fn() -> Box<dyn FunctionsModule>> = library
                .get(CREATE_MODULE_SYMBOL)
                .map_err(|e| ModuleLoadError::SymbolNotFound {
                    path: display.clone(),
                    reason: e.to_string(),
                })?;

            let module: Arc<dyn FunctionsModule> = Arc::from(create());
            Ok::<_, ModuleLoadError>((library, module))
        }
    }));

    match result {
        Ok(Ok(loaded)) => Ok(loaded),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(ModuleLoadError::Panic(display)),
    }
}

/// Loads the module built from the project's working directory.
#[cfg(feature = "dynamic-loading")]
pub struct DirectoryProvider {
    cwd: PathBuf,
    /// Libraries must stay alive while their module instances are in use.
    libraries: Mutex<Vec<libloading::Library>>,
}

#[cfg(feature = "dynamic-loading")]
impl DirectoryProvider {
    /// Create a provider for the given project directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            libraries: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(feature = "dynamic-loading")]
impl ModuleProvider for DirectoryProvider {
    fn load(&self) -> Result<Arc<dyn FunctionsModule>, ModuleLoadError> {
        let artifact = module_artifact(&self.cwd).ok_or_else(|| ModuleLoadError::Artifact {
            dir: self.cwd.display().to_string(),
        })?;
        let (library, module) = load_module_library(&artifact)?;
        self.libraries.lock().push(library);
        Ok(module)
    }
}

/// The serialized form of an inline module unit.
#[derive(Debug, Deserialize)]
pub struct InlineUnit {
    /// Name of the unit; becomes the staged library's crate name.
    pub name: String,
    /// The compiled library, base64-encoded.
    pub library: String,
}

/// Loads an inline-provided unit through the same library path as
/// directory-based modules.
///
/// The supervisor ships the unit when it wants the harness to run a module
/// that is not on disk (deploy previews, fixtures). The bytes are staged
/// into a private temp directory for the lifetime of the provider.
#[cfg(feature = "dynamic-loading")]
pub struct InlineUnitProvider {
    unit: InlineUnit,
    staging: Mutex<Option<tempfile::TempDir>>,
    libraries: Mutex<Vec<libloading::Library>>,
}

#[cfg(feature = "dynamic-loading")]
impl InlineUnitProvider {
    /// Parse the serialized unit the supervisor passed on the command line.
    pub fn from_json(raw: &str) -> Result<Self, ModuleLoadError> {
        let unit: InlineUnit =
            serde_json::from_str(raw).map_err(|e| ModuleLoadError::InlineUnit {
                reason: e.to_string(),
            })?;
        Ok(Self {
            unit,
            staging: Mutex::new(None),
            libraries: Mutex::new(Vec::new()),
        })
    }
}

#[cfg(feature = "dynamic-loading")]
impl ModuleProvider for InlineUnitProvider {
    fn load(&self) -> Result<Arc<dyn FunctionsModule>, ModuleLoadError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.unit.library)
            .map_err(|e| ModuleLoadError::InlineUnit {
                reason: e.to_string(),
            })?;

        let staging = tempfile::tempdir().map_err(|e| ModuleLoadError::InlineUnit {
            reason: e.to_string(),
        })?;
        let path = staging.path().join(library_file_name(&self.unit.name));
        std::fs::write(&path, bytes).map_err(|e| ModuleLoadError::InlineUnit {
            reason: e.to_string(),
        })?;

        let (library, module) = load_module_library(&path)?;
        self.libraries.lock().push(library);
        *self.staging.lock() = Some(staging);
        Ok(module)
    }
}

/// Provider over a module already in memory.
///
/// Embedders (and the harness's own tests) register handlers directly and
/// skip the shared-library round trip.
pub struct StaticProvider {
    module: Arc<dyn FunctionsModule>,
}

impl StaticProvider {
    /// Wrap an existing module.
    pub fn new(module: Arc<dyn FunctionsModule>) -> Self {
        Self { module }
    }
}

impl ModuleProvider for StaticProvider {
    fn load(&self) -> Result<Arc<dyn FunctionsModule>, ModuleLoadError> {
        Ok(Arc::clone(&self.module))
    }
}

/// A definition resolved against its hosting module.
#[derive(Clone)]
pub struct Trigger {
    /// The static descriptor.
    pub definition: TriggerDefinition,
    module: Arc<dyn FunctionsModule>,
}

impl Trigger {
    /// Bind a definition to the module that hosts its entry point.
    pub fn new(definition: TriggerDefinition, module: Arc<dyn FunctionsModule>) -> Self {
        Self { definition, module }
    }

    /// Resolve the handler to invoke, preferring the stashed unwrapped
    /// original when the SDK's registration path recorded one.
    pub fn handler(&self) -> Result<Handler, ResolutionError> {
        let slot = self.module.resolve(&self.definition.entry_point).ok_or_else(|| {
            ResolutionError::EntryPointNotFound {
                name: self.definition.name.clone(),
                entry_point: self.definition.entry_point.clone(),
            }
        })?;
        Ok(slot.effective().clone())
    }

    /// The invocation timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.definition.timeout_ms()
    }

    /// The resolved memory limit in bytes.
    #[must_use]
    pub fn memory_limit_bytes(&self) -> u64 {
        self.definition.memory_limit_bytes()
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// All triggers of one load, by name.
///
/// Built once and queried at most once per process. Duplicate names keep the
/// last definition seen — the supervisor's static analysis is expected to
/// reject true collisions before a bundle ever reaches the harness.
#[derive(Debug, Default)]
pub struct TriggerMap {
    triggers: HashMap<String, Trigger>,
}

impl TriggerMap {
    /// Build the map from recorded definitions and their hosting module.
    #[must_use]
    pub fn from_definitions(
        definitions: Vec<TriggerDefinition>,
        module: &Arc<dyn FunctionsModule>,
    ) -> Self {
        let mut triggers = HashMap::new();
        for definition in definitions {
            triggers.insert(
                definition.name.clone(),
                Trigger::new(definition, Arc::clone(module)),
            );
        }
        Self { triggers }
    }

    /// Look up a trigger by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Trigger> {
        self.triggers.get(name)
    }

    /// Number of triggers in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use stratus_core::event::CollectorSink;
    use stratus_core::trigger::TriggerKind;

    use crate::module::{HandlerSlot, HttpsResponse, StaticModule, background_handler, https_handler};

    use super::*;

    fn definition(name: &str, entry_point: &str) -> TriggerDefinition {
        TriggerDefinition {
            name: name.into(),
            entry_point: entry_point.into(),
            kind: TriggerKind::Https,
            timeout: None,
            regions: vec![],
            available_memory: None,
        }
    }

    #[test]
    fn library_file_name_is_platform_shaped() {
        let name = library_file_name("demo-functions");
        assert!(name.contains("demo_functions"));
    }

    #[test]
    fn detective_flags_uncompiled_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"demo-functions\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        let sink = CollectorSink::new();
        resolution_detective(dir.path(), "load failed", &sink);

        let events = sink.of_kind("module-resolution-failed");
        assert_eq!(events.len(), 1);
        let clues = &events[0].data.as_ref().unwrap()["isPotentially"];
        assert_eq!(clues["uncompiled"], true);
        assert_eq!(clues["wrongDirectory"], false);
    }

    #[test]
    fn detective_flags_wrong_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CollectorSink::new();
        resolution_detective(dir.path(), "load failed", &sink);

        let events = sink.of_kind("module-resolution-failed");
        let clues = &events[0]
            .data
            .as_ref()
            .unwrap()["isPotentially"];
        assert_eq!(clues["uncompiled"], false);
        assert_eq!(clues["wrongDirectory"], true);
    }

    #[test]
    fn trigger_map_keeps_the_last_duplicate() {
        let module: Arc<dyn FunctionsModule> = Arc::new(
            StaticModule::new()
                .define(
                    definition("fn", "first"),
                    HandlerSlot::plain(https_handler(|_ctx, _req| Ok(HttpsResponse::ok("1")))),
                )
                .define(
                    definition("fn", "second"),
                    HandlerSlot::plain(https_handler(|_ctx, _req| Ok(HttpsResponse::ok("2")))),
                ),
        );

        let map = TriggerMap::from_definitions(
            vec![definition("fn", "first"), definition("fn", "second")],
            &module,
        );

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("fn").unwrap().definition.entry_point, "second");
    }

    #[test]
    fn trigger_resolves_preferring_the_stashed_original() {
        let raw = background_handler(|_ctx, _payload| Ok(()));
        let wrapped = https_handler(|_ctx, _req| Ok(HttpsResponse::ok("wrapped")));
        let module: Arc<dyn FunctionsModule> = Arc::new(StaticModule::new().define(
            definition("fn", "entry"),
            HandlerSlot::wrapped(wrapped, raw),
        ));

        let trigger = Trigger::new(definition("fn", "entry"), module);
        assert!(matches!(trigger.handler().unwrap(), Handler::Background(_)));
    }

    #[test]
    fn missing_entry_point_is_a_resolution_error() {
        let module: Arc<dyn FunctionsModule> = Arc::new(StaticModule::new());
        let trigger = Trigger::new(definition("fn", "gone"), module);
        let err = trigger.handler().unwrap_err();
        assert!(matches!(err, ResolutionError::EntryPointNotFound { .. }));
    }

    #[cfg(feature = "dynamic-loading")]
    #[test]
    fn directory_provider_without_artifact_errors() {
        let dir = tempfile::tempdir().unwrap();
        let provider = DirectoryProvider::new(dir.path().to_path_buf());
        let Err(err) = provider.load() else {
            panic!("expected load to fail");
        };
        assert!(matches!(err, ModuleLoadError::Artifact { .. }));
    }

    #[cfg(feature = "dynamic-loading")]
    #[test]
    fn inline_unit_rejects_malformed_payloads() {
        assert!(InlineUnitProvider::from_json("not json").is_err());

        let provider =
            InlineUnitProvider::from_json(r#"{"name": "demo", "library": "!!!"}"#).unwrap();
        let Err(err) = provider.load() else {
            panic!("expected load to fail");
        };
        assert!(matches!(err, ModuleLoadError::InlineUnit { .. }));
    }
}
