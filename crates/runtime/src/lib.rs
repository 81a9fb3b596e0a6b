#![warn(missing_docs)]

//! # Stratus Runtime
//!
//! The one-shot invocation runtime of the Stratus functions emulator.
//!
//! The supervising emulator server spawns one process of this runtime per
//! invocation. The runtime decodes the bundle, verifies the developer
//! project's SDK dependencies, installs the interception surfaces, loads the
//! functions module, and executes exactly one invocation — serving a single
//! HTTP request on a private listener or calling the handler directly with
//! the event payload — while streaming status events to the supervisor.
//!
//! - [`verify`] — SDK dependency gate, checked before any user code runs
//! - [`env`] — per-invocation environment context, built exactly once
//! - [`sdk`] — harness-provided SDK surfaces, wrapped by `stratus-intercept`
//! - [`module`] — the functions-module and handler interface
//! - [`loader`] — shared-library and inline module providers, trigger map
//! - [`legacy`] — docstore legacy event-shape conversion
//! - [`dispatch`] — the one-shot dispatcher, heartbeat, and watchdog
//! - [`reporter`] — the line-per-event status stream

pub mod dispatch;
pub mod env;
pub mod legacy;
pub mod loader;
pub mod module;
pub mod reporter;
pub mod sdk;
pub mod verify;

pub use dispatch::{DispatchOutcome, Dispatcher, ProcessExit, Terminate};
pub use env::EnvContext;
pub use loader::{ModuleProvider, StaticProvider, Trigger, TriggerMap};
#[cfg(feature = "dynamic-loading")]
pub use loader::{DirectoryProvider, InlineUnitProvider};
pub use module::{
    BackgroundFunction, Console, FunctionsModule, Handler, HandlerSlot, HttpsFunction,
    HttpsRequest, HttpsResponse, InvokeContext, StaticModule, background_handler, https_handler,
};
pub use reporter::LineReporter;
pub use sdk::SdkHarness;
