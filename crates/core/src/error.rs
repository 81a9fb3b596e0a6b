//! Error taxonomy of the harness.
//!
//! Three families, matching how the supervisor reacts:
//!
//! - [`SetupError`] — the project is not in a runnable state; reported at
//!   `SYSTEM` level and followed by a clean, non-fatal exit.
//! - [`ResolutionError`] — the requested trigger cannot be resolved;
//!   reported `FATAL`.
//! - [`InvocationError`] — the developer's handler failed; caught by the
//!   dispatcher's run wrapper and reported `FATAL` with the captured trace.

use thiserror::Error;

/// The project cannot be prepared for execution.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The startup payload was not valid JSON.
    #[error("malformed invocation bundle: {0}")]
    MalformedBundle(#[from] serde_json::Error),

    /// The project directory has no dependency manifest.
    #[error("no dependency manifest found in {path}")]
    MissingManifest {
        /// Directory that was searched.
        path: String,
    },

    /// The manifest exists but could not be parsed.
    #[error("unreadable dependency manifest at {path}: {reason}")]
    UnreadableManifest {
        /// Path of the offending manifest.
        path: String,
        /// Parser or IO failure description.
        reason: String,
    },

    /// A required SDK is not declared in the manifest.
    #[error("required dependency '{name}' is not declared")]
    MissingDependency {
        /// Name of the missing SDK crate.
        name: String,
    },

    /// A declared SDK was never resolved into the lockfile.
    #[error("dependency '{name}' is declared but not installed")]
    UnresolvedDependency {
        /// Name of the unresolved SDK crate.
        name: String,
    },

    /// A resolved SDK is older than the harness supports.
    #[error("dependency '{name}' is out of date: found major {found}, need >= {minimum}")]
    OutdatedDependency {
        /// Name of the outdated SDK crate.
        name: String,
        /// Major version found in the lockfile.
        found: u64,
        /// Minimum supported major version.
        minimum: u64,
    },
}

/// The requested trigger cannot be resolved to a callable.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The bundle names a trigger the loaded module does not define.
    #[error("trigger '{id}' not found in the functions module")]
    TriggerNotFound {
        /// The unknown trigger id.
        id: String,
    },

    /// The functions module itself failed to load.
    #[error("functions module failed to load: {reason}")]
    ModuleLoad {
        /// Loader failure description.
        reason: String,
    },

    /// A definition names an entry point the module does not export.
    #[error("trigger '{name}' names missing entry point '{entry_point}'")]
    EntryPointNotFound {
        /// The trigger whose entry point is dangling.
        name: String,
        /// The dotted entry-point path that failed to resolve.
        entry_point: String,
    },

    /// A definition's kind does not match the handler found at its entry point.
    #[error("trigger '{name}' resolved to a handler of the wrong kind")]
    HandlerKindMismatch {
        /// The mismatched trigger.
        name: String,
    },
}

/// Error type developer handlers return.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FunctionError {
    message: String,
}

impl FunctionError {
    /// Create a handler error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The developer's handler failed during the invocation.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The handler returned an error.
    #[error("function failed: {0}")]
    Function(#[from] FunctionError),

    /// The handler panicked; the payload is the captured panic message.
    #[error("function panicked: {0}")]
    Panic(String),
}
